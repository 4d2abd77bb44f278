//! Cross-contract capabilities. Each contract calls its collaborators through
//! these clients, never through the concrete contract crate.

use soroban_sdk::{contractclient, Address, BytesN, Env};

use crate::errors::ContractError;
use crate::types::{PaymentAgreement, SignerProof, SubscriptionLinks};

/// Signature validation capability (ERC-1271 style). Returns
/// `SIGNATURE_MAGIC_VALID` when `proof` is an acceptable signature over `hash`
/// on behalf of `owner`, `SIGNATURE_MAGIC_INVALID` otherwise.
#[contractclient(name = "SignatureValidatorClient")]
pub trait SignatureValidator {
    fn is_valid_signature(env: Env, owner: Address, hash: BytesN<32>, proof: SignerProof) -> u32;
}

/// Delegated signer registry: agent accounts, signing keys and replay nonces.
#[contractclient(name = "SignerRegistryClient")]
pub trait SignerRegistry {
    fn create_agent(env: Env, factory: Address, owner: Address) -> Result<(), ContractError>;
    fn has_agent(env: Env, owner: Address) -> bool;
    fn is_authorized_signer(env: Env, owner: Address, account: Address) -> bool;
    fn check_signature(env: Env, account: Address, hash: BytesN<32>, signature: BytesN<64>) -> bool;
    fn authorize_consumer(env: Env, factory: Address, consumer: Address) -> Result<(), ContractError>;
    fn is_consumer(env: Env, consumer: Address) -> bool;
    fn consume_nonce(
        env: Env,
        consumer: Address,
        owner: Address,
        signer: Address,
        nonce: u64,
    ) -> Result<u64, ContractError>;
}

#[contractclient(name = "CreditMinterClient")]
pub trait CreditMinter {
    fn mint(
        env: Env,
        minter: Address,
        user: Address,
        subscription: BytesN<32>,
        amount: i128,
        from_pool: bool,
    ) -> Result<u64, ContractError>;
    fn authorize_minter(env: Env, caller: Address, minter: Address, allowed: bool) -> Result<(), ContractError>;
    fn is_minter(env: Env, minter: Address) -> bool;
}

#[contractclient(name = "UnderwritingPoolClient")]
pub trait UnderwritingPool {
    fn draw(
        env: Env,
        drawer: Address,
        agreement_id: BytesN<32>,
        user: Address,
        token: Address,
        amount: i128,
        max_cover: i128,
        recipient: Address,
    ) -> Result<i128, ContractError>;
    fn grant_credit_line(
        env: Env,
        caller: Address,
        user: Address,
        token: Address,
        amount: i128,
    ) -> Result<(), ContractError>;
    fn authorize_drawer(env: Env, caller: Address, drawer: Address, allowed: bool) -> Result<(), ContractError>;
    fn is_drawer(env: Env, drawer: Address) -> bool;
    fn get_user_debt(env: Env, user: Address, token: Address) -> i128;
}

#[contractclient(name = "AgreementRegistryClient")]
pub trait AgreementRegistry {
    fn open(
        env: Env,
        factory: Address,
        terms: PaymentAgreement,
        links: SubscriptionLinks,
    ) -> Result<(), ContractError>;
}

#[contractclient(name = "PlatformConfigClient")]
pub trait PlatformConfig {
    fn platform_signer(env: Env) -> Address;
}
