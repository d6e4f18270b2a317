//! Executor option decoding
//!
//! Extracts the `lzReceive` gas and value the sender paid for from the
//! `options` blob of a `PacketSent` event.

use crate::error::RelayError;

const TYPE_1: u16 = 1;
const TYPE_2: u16 = 2;
const TYPE_3: u16 = 3;

const EXECUTOR_WORKER_ID: u8 = 1;
const OPTION_TYPE_LZRECEIVE: u8 = 1;

/// Gas limit and native value to forward with `lzReceive`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecutorOptions {
    pub gas: u128,
    pub value: u128,
}

/// Decodes the executor `lzReceive` option out of an options blob.
///
/// Supports type 3 worker options (summing repeated `lzReceive` entries) and
/// the legacy type 1 / type 2 layouts. Anything else, or a blob without an
/// `lzReceive` entry, is [`RelayError::MissingExecutorOptions`].
pub fn decode_executor_options(options: &[u8]) -> Result<ExecutorOptions, RelayError> {
    if options.len() < 2 {
        return Err(RelayError::MissingExecutorOptions);
    }
    let option_type = u16::from_be_bytes([options[0], options[1]]);
    let body = &options[2..];

    match option_type {
        TYPE_3 => decode_type3(body),
        TYPE_1 | TYPE_2 => decode_legacy(option_type, body),
        _ => Err(RelayError::MissingExecutorOptions),
    }
}

fn decode_type3(mut body: &[u8]) -> Result<ExecutorOptions, RelayError> {
    let mut total: Option<ExecutorOptions> = None;

    while !body.is_empty() {
        // workerId:u8 | size:u16 | optionType:u8 | data[size - 1]
        if body.len() < 4 {
            return Err(RelayError::MissingExecutorOptions);
        }
        let worker_id = body[0];
        let size = u16::from_be_bytes([body[1], body[2]]) as usize;
        if size == 0 || body.len() < 3 + size {
            return Err(RelayError::MissingExecutorOptions);
        }
        let option_type = body[3];
        let data = &body[4..3 + size];
        body = &body[3 + size..];

        if worker_id != EXECUTOR_WORKER_ID || option_type != OPTION_TYPE_LZRECEIVE {
            continue;
        }

        let (gas, value) = match data.len() {
            16 => (read_u128(data), 0),
            32 => (read_u128(&data[..16]), read_u128(&data[16..])),
            _ => return Err(RelayError::MissingExecutorOptions),
        };

        let acc = total.get_or_insert_with(ExecutorOptions::default);
        acc.gas = acc.gas.saturating_add(gas);
        acc.value = acc.value.saturating_add(value);
    }

    total.ok_or(RelayError::MissingExecutorOptions)
}

fn decode_legacy(option_type: u16, body: &[u8]) -> Result<ExecutorOptions, RelayError> {
    let fixed_len = if option_type == TYPE_1 { 32 } else { 64 };
    if body.len() < fixed_len {
        return Err(RelayError::MissingExecutorOptions);
    }
    if option_type == TYPE_1 && body.len() != fixed_len {
        return Err(RelayError::MissingExecutorOptions);
    }

    // uint256 gas, only the low 128 bits are meaningful
    if body[..16].iter().any(|b| *b != 0) {
        return Err(RelayError::MissingExecutorOptions);
    }
    Ok(ExecutorOptions {
        gas: read_u128(&body[16..32]),
        value: 0,
    })
}

fn read_u128(data: &[u8]) -> u128 {
    let mut buf = [0u8; 16];
    buf.copy_from_slice(&data[..16]);
    u128::from_be_bytes(buf)
}
