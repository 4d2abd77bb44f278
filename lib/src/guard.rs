//! Instance-storage reentrancy guard for entry points that hand control to a
//! token or another contract.

use soroban_sdk::{Env, Symbol};

use crate::constant::REENTRANCY_KEY;
use crate::errors::ContractError;

fn reentrancy_key(env: &Env) -> Symbol {
    Symbol::new(env, REENTRANCY_KEY)
}

pub fn enter(env: &Env) -> Result<(), ContractError> {
    let key = reentrancy_key(env);
    let locked: bool = env.storage().instance().get(&key).unwrap_or(false);
    if locked {
        return Err(ContractError::Reentrancy);
    }
    env.storage().instance().set(&key, &true);
    Ok(())
}

pub fn exit(env: &Env) {
    env.storage().instance().set(&reentrancy_key(env), &false);
}

/// Run `f` with the guard held. An `Err` from `f` rolls the whole invocation
/// back, including the lock.
pub fn guarded<T, F>(env: &Env, f: F) -> Result<T, ContractError>
where
    F: FnOnce() -> Result<T, ContractError>,
{
    enter(env)?;
    let result = f()?;
    exit(env);
    Ok(result)
}
