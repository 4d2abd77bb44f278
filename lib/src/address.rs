use soroban_sdk::{Address, Env, String};

/// Account strkey of the all-zero ed25519 key. No one holds its secret, so it
/// stands in for the "unset" address.
pub const NULL_ACCOUNT: &str = "GAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAWHF";

pub fn null_address(env: &Env) -> Address {
    Address::from_string(&String::from_str(env, NULL_ACCOUNT))
}

pub fn is_null(env: &Env, address: &Address) -> bool {
    *address == null_address(env)
}
