//! Solidity ABI calldata for the two poll contract entry points.

use alloy_sol_types::{sol, SolCall};

use super::ContractCall;

sol! {
    function createPoll(string pollId, string question, string[] options);
    function vote(string pollId, string option);
}

/// Raw calldata (selector followed by encoded arguments).
pub fn encode_call(call: &ContractCall) -> Vec<u8> {
    match call {
        ContractCall::CreatePoll {
            poll_id,
            question,
            options,
        } => createPollCall {
            pollId: poll_id.to_string(),
            question: question.clone(),
            options: options.clone(),
        }
        .abi_encode(),
        ContractCall::Vote { poll_id, option } => voteCall {
            pollId: poll_id.to_string(),
            option: option.clone(),
        }
        .abi_encode(),
    }
}

/// `0x`-prefixed calldata for `eth_sendTransaction`.
pub fn encode_call_hex(call: &ContractCall) -> String {
    format!("0x{}", hex::encode(encode_call(call)))
}
