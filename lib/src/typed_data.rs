//! Domain-separated digests for every signed PayGuard message.
//!
//! A digest is `sha256(xdr(Domain) || xdr(Symbol(type_name)) || xdr(payload))`.
//! The domain binds the network and the verifying contract, so a signature
//! made for one contract (or one network) never validates on another.
//! Off-chain signers reproduce these bytes exactly; the contracts expose the
//! same functions as views.

use ed25519_dalek::{Signature, VerifyingKey};
use soroban_sdk::{
    contracttype, xdr::ToXdr, Address, Bytes, BytesN, Env, IntoVal, String, Symbol, Val, Vec,
};

use crate::constant::{
    AGENT_ACTION_TYPE_NAME, AGREEMENT_TYPE_NAME, CANCEL_TYPE_NAME, DOMAIN_NAME, DOMAIN_VERSION,
};
use crate::types::PaymentAgreement;

#[derive(Clone, Debug, Eq, PartialEq)]
#[contracttype]
pub struct Domain {
    pub name: String,
    pub version: String,
    pub network_id: BytesN<32>,
    pub verifying_contract: Address,
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[contracttype]
pub struct CancelSubscription {
    pub agreement_id: BytesN<32>,
    pub nonce: u64,
    pub timestamp: u64,
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[contracttype]
pub struct AgentAction {
    pub owner: Address,
    pub target: Address,
    pub function: Symbol,
    pub args: Vec<Val>,
    pub nonce: u64,
}

pub fn domain(env: &Env, verifying_contract: &Address) -> Domain {
    Domain {
        name: String::from_str(env, DOMAIN_NAME),
        version: String::from_str(env, DOMAIN_VERSION),
        network_id: env.ledger().network_id(),
        verifying_contract: verifying_contract.clone(),
    }
}

pub fn sha256(env: &Env, payload: &Bytes) -> BytesN<32> {
    env.crypto().sha256(payload).into()
}

pub fn hash_typed<T>(env: &Env, verifying_contract: &Address, type_name: &str, message: T) -> BytesN<32>
where
    T: IntoVal<Env, Val>,
{
    let mut buf = Bytes::new(env);
    buf.append(&domain(env, verifying_contract).to_xdr(env));
    buf.append(&Symbol::new(env, type_name).to_xdr(env));
    buf.append(&message.to_xdr(env));
    sha256(env, &buf)
}

/// Content-derived agreement id over `(user, provider, token, amount, start_date)`.
pub fn derive_agreement_id(
    env: &Env,
    user: &Address,
    provider: &Address,
    token: &Address,
    amount: i128,
    start_date: u64,
) -> BytesN<32> {
    let fields = (
        user.clone(),
        provider.clone(),
        token.clone(),
        amount,
        start_date,
    );
    sha256(env, &fields.to_xdr(env))
}

/// Digest a provider and a user (or the user's agent) sign to accept terms.
/// The verifying contract is the factory.
pub fn agreement_digest(env: &Env, factory: &Address, agreement: &PaymentAgreement) -> BytesN<32> {
    hash_typed(env, factory, AGREEMENT_TYPE_NAME, agreement.clone())
}

/// Digest signed to cancel one agreement. The verifying contract is the
/// contract hosting the agreement.
pub fn cancel_digest(
    env: &Env,
    subscriptions: &Address,
    agreement_id: &BytesN<32>,
    nonce: u64,
    timestamp: u64,
) -> BytesN<32> {
    let message = CancelSubscription {
        agreement_id: agreement_id.clone(),
        nonce,
        timestamp,
    };
    hash_typed(env, subscriptions, CANCEL_TYPE_NAME, message)
}

/// Struct hash binding a relayed call to its target, payload and nonce.
pub fn agent_action_struct_hash(env: &Env, action: &AgentAction) -> BytesN<32> {
    sha256(env, &action.clone().to_xdr(env))
}

/// Digest an agent signs for a relayed call; wraps a caller-supplied struct hash.
pub fn agent_action_digest(env: &Env, user_agent: &Address, struct_hash: &BytesN<32>) -> BytesN<32> {
    hash_typed(env, user_agent, AGENT_ACTION_TYPE_NAME, struct_hash.clone())
}

/// Strict ed25519 check of `signature` over the digest bytes. Malformed keys
/// and non-canonical signatures verify as false rather than aborting.
pub fn verify_digest(
    public_key: &BytesN<32>,
    digest: &BytesN<32>,
    signature: &BytesN<64>,
) -> bool {
    let Ok(key) = VerifyingKey::from_bytes(&public_key.to_array()) else {
        return false;
    };
    let signature = Signature::from_bytes(&signature.to_array());
    key.verify_strict(&digest.to_array(), &signature).is_ok()
}
