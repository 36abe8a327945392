//! ERC-20 call encoding

use crate::error::{BridgeError, BridgeResult};

use alloy_primitives::{Address, U256};
use alloy_sol_types::{sol, SolCall};

sol! {
    interface IERC20 {
        function balanceOf(address owner) external view returns (uint256 balance);
        function approve(address spender, uint256 amount) external returns (bool success);
    }
}

fn parse_address(address: &str) -> BridgeResult<Address> {
    address
        .parse::<Address>()
        .map_err(|e| BridgeError::Internal(format!("Invalid address {}: {}", address, e)))
}

/// Calldata for `balanceOf(owner)`
pub fn balance_of_calldata(owner: &str) -> BridgeResult<Vec<u8>> {
    let owner = parse_address(owner)?;
    Ok(IERC20::balanceOfCall { owner }.abi_encode())
}

/// Decode the `balanceOf` return data
pub fn decode_balance(data: &[u8]) -> BridgeResult<U256> {
    // Some tokens answer an empty payload for accounts they have never seen
    if data.is_empty() {
        return Ok(U256::ZERO);
    }

    IERC20::balanceOfCall::abi_decode_returns(data, true)
        .map(|ret| ret.balance)
        .map_err(|e| BridgeError::Internal(format!("Malformed balanceOf return: {}", e)))
}

/// Calldata for `approve(spender, amount)`
pub fn approve_calldata(spender: &str, amount: &str) -> BridgeResult<Vec<u8>> {
    let spender = parse_address(spender)?;
    let amount = U256::from_str_radix(amount, 10)
        .map_err(|e| BridgeError::InvalidAmount(format!("{}: {}", amount, e)))?;
    Ok(IERC20::approveCall { spender, amount }.abi_encode())
}
