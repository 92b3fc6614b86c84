//! Extracts the anti-pinning unlock height embedded in a sweep
//! transaction's witness script.
//!
//! The bridge encodes the height as a little-endian push at a fixed stack
//! position of the witness script on input 0. The value is both the
//! bridge-level timelock and the persistence key for the queue, so the
//! decode has to be deterministic: any verifier walking the same witness
//! must recover the same integer.

use bitcoin::blockdata::script::Instruction;
use bitcoin::consensus::encode::Decodable;
use bitcoin::{Script, Transaction};

use crate::{Result, SweepSdkError};

/// Stack position of the unlock-height push in the disassembled witness script.
pub const HEIGHT_STACK_POSITION: usize = 25;

/// Decode a hex-encoded consensus-serialized transaction.
pub fn transaction_from_hex(tx_hex: &str) -> Result<Transaction> {
    let bytes =
        hex::decode(tx_hex.trim()).map_err(|e| SweepSdkError::Decode(format!("invalid hex: {}", e)))?;
    Transaction::consensus_decode(&mut &bytes[..]).map_err(|e| SweepSdkError::Decode(e.to_string()))
}

/// Extract the unlock height from the witness script of input 0.
///
/// Fails if the transaction has no inputs, input 0 carries no witness,
/// the script does not disassemble, or the designated stack position is
/// absent or not a data push. Callers treat any failure as "drop this
/// sweep signal".
pub fn extract_unlock_height(tx: &Transaction) -> Result<u64> {
    let input = tx
        .input
        .first()
        .ok_or_else(|| SweepSdkError::HeightExtraction("transaction has no inputs".into()))?;

    let witness_script = input.witness.last().ok_or_else(|| {
        SweepSdkError::HeightExtraction("first input carries no witness data".into())
    })?;

    let script = Script::from_bytes(witness_script);
    let instruction = script
        .instructions()
        .nth(HEIGHT_STACK_POSITION)
        .ok_or_else(|| {
            SweepSdkError::HeightExtraction(format!(
                "witness script has no element at stack position {}",
                HEIGHT_STACK_POSITION
            ))
        })?
        .map_err(|e| SweepSdkError::HeightExtraction(format!("script disassembly failed: {}", e)))?;

    match instruction {
        Instruction::PushBytes(push) => decode_le_height(push.as_bytes()),
        Instruction::Op(op) => Err(SweepSdkError::HeightExtraction(format!(
            "expected height push at stack position {}, found opcode {:?}",
            HEIGHT_STACK_POSITION, op
        ))),
    }
}

/// The height bytes sit little-endian in the script push. Pushes wider
/// than a u64 (a key or hash landing at the height position) are
/// rejected, not truncated.
pub fn decode_le_height(bytes: &[u8]) -> Result<u64> {
    if bytes.len() > 8 {
        return Err(SweepSdkError::HeightExtraction(format!(
            "height push is {} bytes, wider than u64",
            bytes.len()
        )));
    }
    Ok(bytes.iter().rev().fold(0u64, |acc, &b| (acc << 8) | b as u64))
}

/// Minimal little-endian encoding of a height, as the bridge pushes it.
pub fn encode_le_height(height: u64) -> Vec<u8> {
    let mut bytes = height.to_le_bytes().to_vec();
    while bytes.len() > 1 && bytes.last() == Some(&0) {
        bytes.pop();
    }
    bytes
}
