#![no_std]

//! Delegated signer agents.
//!
//! Every user gets one `AgentAccount`, created by the factory and reused for
//! all of that user's subscriptions. The owner authorizes agent accounts that
//! may sign on their behalf. Each (owner, signer) pair carries its own replay
//! counter; deauthorizing an agent resets its counter to zero.
//!
//! The contract also holds the signer-key directory that maps an account to
//! the ed25519 key its signatures are checked against.

use payguard_lib::{
    address, errors::ContractError, typed_data, SignerProof, ADMIN_KEY, FACTORY_KEY,
    MAX_BATCH_SIZE, SIGNATURE_MAGIC_INVALID, SIGNATURE_MAGIC_VALID,
};
use soroban_sdk::{
    contract, contractimpl, contracttype, log, symbol_short, Address, BytesN, Env, Symbol, Val,
    Vec,
};

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AgentAccount {
    pub owner: Address,
    pub agents: Vec<Address>,
    pub created_at: u64,
}

#[contracttype]
#[derive(Clone)]
enum DataKey {
    Account(Address),
    Nonce(Address, Address),
    SigningKey(Address),
    Consumer(Address),
}

#[contract]
pub struct UserAgent;

#[contractimpl]
impl UserAgent {
    pub fn init(env: Env, admin: Address, factory: Address) -> Result<(), ContractError> {
        if env.storage().instance().has(&Symbol::new(&env, ADMIN_KEY)) {
            return Err(ContractError::AlreadyInitialized);
        }
        if address::is_null(&env, &factory) {
            return Err(ContractError::InvalidAddress);
        }

        admin.require_auth();
        env.storage()
            .instance()
            .set(&Symbol::new(&env, ADMIN_KEY), &admin);
        env.storage()
            .instance()
            .set(&Symbol::new(&env, FACTORY_KEY), &factory);
        Ok(())
    }

    pub fn set_factory(env: Env, admin: Address, factory: Address) -> Result<(), ContractError> {
        admin.require_auth();
        Self::verify_admin(&env, &admin)?;
        if address::is_null(&env, &factory) {
            return Err(ContractError::InvalidAddress);
        }
        env.storage()
            .instance()
            .set(&Symbol::new(&env, FACTORY_KEY), &factory);
        Ok(())
    }

    /// Create the agent account for `owner`. Factory only.
    pub fn create_agent(env: Env, factory: Address, owner: Address) -> Result<(), ContractError> {
        factory.require_auth();
        Self::verify_factory(&env, &factory)?;
        if address::is_null(&env, &owner) {
            return Err(ContractError::InvalidAddress);
        }

        let key = DataKey::Account(owner.clone());
        if env.storage().persistent().has(&key) {
            return Err(ContractError::AlreadyExists);
        }

        let account = AgentAccount {
            owner: owner.clone(),
            agents: Vec::new(&env),
            created_at: env.ledger().timestamp(),
        };
        env.storage().persistent().set(&key, &account);

        env.events()
            .publish((Symbol::new(&env, "agent_created"),), owner);
        Ok(())
    }

    pub fn has_agent(env: Env, owner: Address) -> bool {
        env.storage()
            .persistent()
            .has(&DataKey::Account(owner))
    }

    pub fn get_agent_account(env: Env, owner: Address) -> Option<AgentAccount> {
        env.storage().persistent().get(&DataKey::Account(owner))
    }

    /// Bind `account` to the ed25519 key its signatures are checked against.
    /// Calling again rotates the key.
    pub fn register_signing_key(env: Env, account: Address, key: BytesN<32>) {
        account.require_auth();
        env.storage()
            .persistent()
            .set(&DataKey::SigningKey(account.clone()), &key);
        env.events()
            .publish((symbol_short!("key_set"),), (account, key));
    }

    pub fn get_signing_key(env: Env, account: Address) -> Option<BytesN<32>> {
        env.storage().persistent().get(&DataKey::SigningKey(account))
    }

    /// Verify `signature` over `hash` against the key registered for
    /// `account`. False when no key is registered or the signature does not
    /// verify.
    pub fn check_signature(
        env: Env,
        account: Address,
        hash: BytesN<32>,
        signature: BytesN<64>,
    ) -> bool {
        match Self::get_signing_key(env.clone(), account) {
            Some(key) => typed_data::verify_digest(&key, &hash, &signature),
            None => false,
        }
    }

    pub fn authorize_agent(
        env: Env,
        owner: Address,
        agent: Address,
        allowed: bool,
    ) -> Result<(), ContractError> {
        owner.require_auth();
        let mut account = Self::load_account(&env, &owner)?;
        if address::is_null(&env, &agent) {
            return Err(ContractError::InvalidAgentAddress);
        }

        Self::apply_authorization(&env, &mut account, &agent, allowed);
        env.storage()
            .persistent()
            .set(&DataKey::Account(owner), &account);
        Ok(())
    }

    /// Apply several authorizations at once. Nothing is written unless every
    /// entry is valid.
    pub fn batch_authorize_agents(
        env: Env,
        owner: Address,
        agents: Vec<Address>,
        allowed: Vec<bool>,
    ) -> Result<(), ContractError> {
        owner.require_auth();
        if agents.len() != allowed.len() {
            return Err(ContractError::ArrayLengthMismatch);
        }
        if agents.len() > MAX_BATCH_SIZE {
            return Err(ContractError::InvalidInput);
        }
        let mut account = Self::load_account(&env, &owner)?;
        for agent in agents.iter() {
            if address::is_null(&env, &agent) {
                return Err(ContractError::InvalidAgentAddress);
            }
        }

        for (agent, allow) in agents.iter().zip(allowed.iter()) {
            Self::apply_authorization(&env, &mut account, &agent, allow);
        }
        env.storage()
            .persistent()
            .set(&DataKey::Account(owner), &account);
        Ok(())
    }

    /// Immediate deauthorization of an agent that is currently authorized.
    pub fn emergency_revoke(env: Env, owner: Address, agent: Address) -> Result<(), ContractError> {
        owner.require_auth();
        let mut account = Self::load_account(&env, &owner)?;
        if !account.agents.contains(&agent) {
            return Err(ContractError::AgentNotAuthorized);
        }

        Self::apply_authorization(&env, &mut account, &agent, false);
        env.storage()
            .persistent()
            .set(&DataKey::Account(owner.clone()), &account);
        env.events()
            .publish((Symbol::new(&env, "agent_revoked"),), (owner, agent));
        Ok(())
    }

    pub fn is_authorized_agent(env: Env, owner: Address, agent: Address) -> bool {
        Self::get_agent_account(env, owner)
            .map(|account| account.agents.contains(&agent))
            .unwrap_or(false)
    }

    /// True for the owner itself and for any currently authorized agent.
    pub fn is_authorized_signer(env: Env, owner: Address, account: Address) -> bool {
        account == owner || Self::is_authorized_agent(env, owner, account)
    }

    pub fn get_authorized_agents(env: Env, owner: Address) -> Vec<Address> {
        Self::get_agent_account(env.clone(), owner)
            .map(|account| account.agents)
            .unwrap_or_else(|| Vec::new(&env))
    }

    pub fn get_agent_nonce(env: Env, owner: Address, agent: Address) -> u64 {
        env.storage()
            .persistent()
            .get(&DataKey::Nonce(owner, agent))
            .unwrap_or(0)
    }

    /// Capability check: `SIGNATURE_MAGIC_VALID` iff `proof.signer` is the
    /// owner or one of its authorized agents and the signature verifies
    /// against the signer's registered key. Unknown signers and missing keys
    /// yield `SIGNATURE_MAGIC_INVALID`.
    pub fn is_valid_signature(env: Env, owner: Address, hash: BytesN<32>, proof: SignerProof) -> u32 {
        if !Self::is_authorized_signer(env.clone(), owner, proof.signer.clone()) {
            return SIGNATURE_MAGIC_INVALID;
        }
        if Self::check_signature(env, proof.signer, hash, proof.signature) {
            SIGNATURE_MAGIC_VALID
        } else {
            SIGNATURE_MAGIC_INVALID
        }
    }

    /// Relay a call signed by one of `owner`'s agents. The agent's nonce is
    /// consumed before the call is forwarded, so it stays consumed when the
    /// forwarded call fails. Returns whether the forwarded call succeeded.
    ///
    /// `struct_hash` must equal the hash of the `AgentAction` built from the
    /// remaining arguments; the agent signs `agent_action_digest(struct_hash)`.
    #[allow(clippy::too_many_arguments)]
    pub fn execute_agent_action(
        env: Env,
        owner: Address,
        proof: SignerProof,
        struct_hash: BytesN<32>,
        nonce: u64,
        target: Address,
        function: Symbol,
        args: Vec<Val>,
    ) -> Result<bool, ContractError> {
        if address::is_null(&env, &target) {
            return Err(ContractError::InvalidTarget);
        }
        let agent = proof.signer.clone();
        if !Self::is_authorized_agent(env.clone(), owner.clone(), agent.clone()) {
            return Err(ContractError::AgentNotAuthorized);
        }
        let current = Self::get_agent_nonce(env.clone(), owner.clone(), agent.clone());
        if nonce != current {
            return Err(ContractError::InvalidNonce);
        }

        let action = typed_data::AgentAction {
            owner: owner.clone(),
            target: target.clone(),
            function: function.clone(),
            args: args.clone(),
            nonce,
        };
        if typed_data::agent_action_struct_hash(&env, &action) != struct_hash {
            return Err(ContractError::InvalidSignature);
        }
        let key = Self::get_signing_key(env.clone(), agent.clone())
            .ok_or(ContractError::AgentNotAuthorized)?;
        let digest =
            typed_data::agent_action_digest(&env, &env.current_contract_address(), &struct_hash);
        if !typed_data::verify_digest(&key, &digest, &proof.signature) {
            return Err(ContractError::AgentNotAuthorized);
        }

        let next = current.checked_add(1).ok_or(ContractError::OverflowError)?;
        env.storage()
            .persistent()
            .set(&DataKey::Nonce(owner.clone(), agent.clone()), &next);

        let success = matches!(
            env.try_invoke_contract::<Val, ContractError>(&target, &function, args),
            Ok(Ok(_))
        );
        if !success {
            log!(&env, "agent action failed", owner, agent, target, function);
        }

        env.events().publish(
            (Symbol::new(&env, "agent_exec"),),
            (owner, agent, target, function, nonce, success),
        );
        Ok(success)
    }

    /// Hash of the relayed call an agent is about to sign.
    pub fn agent_action_hash(
        env: Env,
        owner: Address,
        target: Address,
        function: Symbol,
        args: Vec<Val>,
        nonce: u64,
    ) -> BytesN<32> {
        let action = typed_data::AgentAction {
            owner,
            target,
            function,
            args,
            nonce,
        };
        typed_data::agent_action_struct_hash(&env, &action)
    }

    pub fn agent_action_digest(env: Env, struct_hash: BytesN<32>) -> BytesN<32> {
        typed_data::agent_action_digest(&env, &env.current_contract_address(), &struct_hash)
    }

    /// Allow a contract to consume signer nonces. Admin or factory.
    pub fn authorize_consumer(
        env: Env,
        factory: Address,
        consumer: Address,
    ) -> Result<(), ContractError> {
        factory.require_auth();
        if Self::verify_admin(&env, &factory).is_err() {
            Self::verify_factory(&env, &factory)?;
        }
        env.storage()
            .persistent()
            .set(&DataKey::Consumer(consumer), &true);
        Ok(())
    }

    pub fn is_consumer(env: Env, consumer: Address) -> bool {
        env.storage()
            .persistent()
            .get(&DataKey::Consumer(consumer))
            .unwrap_or(false)
    }

    /// Check `nonce` against the (owner, signer) counter and advance it.
    /// Returns the new counter value.
    pub fn consume_nonce(
        env: Env,
        consumer: Address,
        owner: Address,
        signer: Address,
        nonce: u64,
    ) -> Result<u64, ContractError> {
        consumer.require_auth();
        if !Self::is_consumer(env.clone(), consumer) {
            return Err(ContractError::Unauthorized);
        }
        if !Self::is_authorized_signer(env.clone(), owner.clone(), signer.clone()) {
            return Err(ContractError::AgentNotAuthorized);
        }
        let current = Self::get_agent_nonce(env.clone(), owner.clone(), signer.clone());
        if nonce != current {
            return Err(ContractError::InvalidNonce);
        }

        let next = current.checked_add(1).ok_or(ContractError::OverflowError)?;
        env.storage()
            .persistent()
            .set(&DataKey::Nonce(owner, signer), &next);
        Ok(next)
    }

    fn apply_authorization(env: &Env, account: &mut AgentAccount, agent: &Address, allowed: bool) {
        let position = account.agents.first_index_of(agent);
        if allowed {
            if position.is_none() {
                account.agents.push_back(agent.clone());
            }
        } else {
            if let Some(index) = position {
                account.agents.remove(index);
            }
            // Signed but unsubmitted actions from this agent become stale.
            env.storage()
                .persistent()
                .remove(&DataKey::Nonce(account.owner.clone(), agent.clone()));
        }

        env.events().publish(
            (Symbol::new(env, "agent_auth"),),
            (account.owner.clone(), agent.clone(), allowed),
        );
    }

    fn load_account(env: &Env, owner: &Address) -> Result<AgentAccount, ContractError> {
        env.storage()
            .persistent()
            .get(&DataKey::Account(owner.clone()))
            .ok_or(ContractError::NotFound)
    }

    fn verify_admin(env: &Env, caller: &Address) -> Result<(), ContractError> {
        let admin: Address = env
            .storage()
            .instance()
            .get(&Symbol::new(env, ADMIN_KEY))
            .ok_or(ContractError::NotInitialized)?;

        if caller != &admin {
            return Err(ContractError::Unauthorized);
        }
        Ok(())
    }

    fn verify_factory(env: &Env, caller: &Address) -> Result<(), ContractError> {
        let factory: Address = env
            .storage()
            .instance()
            .get(&Symbol::new(env, FACTORY_KEY))
            .ok_or(ContractError::NotInitialized)?;

        if caller != &factory {
            return Err(ContractError::Unauthorized);
        }
        Ok(())
    }
}
