#![no_std]

//! Agreement factory: validates signed payment agreements, makes sure every
//! user has a delegated signer agent, and opens the agreement in the
//! subscription contract. It is the single writer of the agreement and user
//! indexes, and it wires new agreements into the credit ledger, reserve pool
//! and signer registry.

use payguard_lib::{
    address,
    errors::ContractError,
    interfaces::{
        AgreementRegistryClient, CreditMinterClient, SignatureValidatorClient,
        SignerRegistryClient, UnderwritingPoolClient,
    },
    typed_data, PaymentAgreement, SignerProof, SubscriptionLinks, ADMIN_KEY,
    SIGNATURE_MAGIC_VALID,
};
use soroban_sdk::{
    contract, contractimpl, contracttype, panic_with_error, Address, BytesN, Env, Symbol, Vec,
};

const PLATFORM_SIGNER_KEY: &str = "platform";
const RESERVE_POOL_KEY: &str = "pool";
const CREDIT_LEDGER_KEY: &str = "ledger";
const USER_AGENT_KEY: &str = "agents";
const SUBSCRIPTIONS_KEY: &str = "subs";

#[contracttype]
#[derive(Clone)]
enum DataKey {
    Subscription(BytesN<32>),
    UserSubscriptions(Address),
}

#[contract]
pub struct AgreementFactory;

#[contractimpl]
impl AgreementFactory {
    pub fn init(
        env: Env,
        admin: Address,
        platform_signer: Address,
        reserve_pool: Address,
        credit_ledger: Address,
        user_agent: Address,
        subscriptions: Address,
    ) -> Result<(), ContractError> {
        if env.storage().instance().has(&Symbol::new(&env, ADMIN_KEY)) {
            return Err(ContractError::AlreadyInitialized);
        }
        for reference in [
            &platform_signer,
            &reserve_pool,
            &credit_ledger,
            &user_agent,
            &subscriptions,
        ] {
            if address::is_null(&env, reference) {
                return Err(ContractError::InvalidAddress);
            }
        }

        admin.require_auth();
        let storage = env.storage().instance();
        storage.set(&Symbol::new(&env, ADMIN_KEY), &admin);
        storage.set(&Symbol::new(&env, PLATFORM_SIGNER_KEY), &platform_signer);
        storage.set(&Symbol::new(&env, RESERVE_POOL_KEY), &reserve_pool);
        storage.set(&Symbol::new(&env, CREDIT_LEDGER_KEY), &credit_ledger);
        storage.set(&Symbol::new(&env, USER_AGENT_KEY), &user_agent);
        storage.set(&Symbol::new(&env, SUBSCRIPTIONS_KEY), &subscriptions);
        Ok(())
    }

    /// Create the delegated signer agent for `user`. Returns the address of
    /// the contract holding it.
    pub fn create_user_agent(env: Env, user: Address) -> Result<Address, ContractError> {
        if address::is_null(&env, &user) {
            return Err(ContractError::InvalidAddress);
        }
        let user_agent = Self::user_agent(env.clone())?;
        let registry = SignerRegistryClient::new(&env, &user_agent);
        if registry.has_agent(&user) {
            return Err(ContractError::AlreadyExists);
        }

        Self::open_user_agent(&env, &registry, &user);
        Ok(user_agent)
    }

    /// Validate a signed agreement and open it as a subscription.
    ///
    /// Both parties sign `agreement_digest(agreement)`. The provider must
    /// sign with its own registered key. The user's proof may come from the
    /// user or, once the user has an agent account, from any of its
    /// authorized agents. Returns the agreement id.
    ///
    /// # Errors
    /// - A field-specific validation error for the first invalid field
    /// - `InvalidAgreementId` if the id is not derived from the terms
    /// - `AgreementExists` if the id was used before
    /// - `InvalidProviderSignature` / `InvalidUserSignature`
    pub fn create_subscription(
        env: Env,
        agreement: PaymentAgreement,
        provider_signature: BytesN<64>,
        user_proof: SignerProof,
    ) -> Result<BytesN<32>, ContractError> {
        Self::validate(&env, &agreement)?;

        let id = agreement.agreement_id.clone();
        if env
            .storage()
            .persistent()
            .has(&DataKey::Subscription(id.clone()))
        {
            return Err(ContractError::AgreementExists);
        }

        let links = SubscriptionLinks {
            reserve_pool: Self::reserve_pool(env.clone())?,
            credit_ledger: Self::credit_ledger(env.clone())?,
            user_agent: Self::user_agent(env.clone())?,
        };
        let subscriptions = Self::subscriptions(env.clone())?;
        let registry = SignerRegistryClient::new(&env, &links.user_agent);
        let digest = typed_data::agreement_digest(&env, &env.current_contract_address(), &agreement);

        // Any registry failure counts as an invalid signature.
        if !matches!(
            registry.try_check_signature(&agreement.provider, &digest, &provider_signature),
            Ok(Ok(true))
        ) {
            return Err(ContractError::InvalidProviderSignature);
        }

        let has_agent = registry.has_agent(&agreement.user);
        let user_signed = if has_agent {
            let validator = SignatureValidatorClient::new(&env, &links.user_agent);
            matches!(
                validator.try_is_valid_signature(&agreement.user, &digest, &user_proof),
                Ok(Ok(SIGNATURE_MAGIC_VALID))
            )
        } else {
            user_proof.signer == agreement.user
                && matches!(
                    registry.try_check_signature(
                        &agreement.user,
                        &digest,
                        &user_proof.signature
                    ),
                    Ok(Ok(true))
                )
        };
        if !user_signed {
            return Err(ContractError::InvalidUserSignature);
        }

        if !has_agent {
            Self::open_user_agent(&env, &registry, &agreement.user);
        }
        Self::grant_roles(&env, &links, &subscriptions);

        AgreementRegistryClient::new(&env, &subscriptions).open(
            &env.current_contract_address(),
            &agreement,
            &links,
        );

        env.storage()
            .persistent()
            .set(&DataKey::Subscription(id.clone()), &subscriptions);
        let mut ids = Self::get_user_subscriptions(env.clone(), agreement.user.clone());
        ids.push_back(id.clone());
        env.storage()
            .persistent()
            .set(&DataKey::UserSubscriptions(agreement.user.clone()), &ids);

        env.events().publish(
            (Symbol::new(&env, "subscription_created"),),
            (id.clone(), agreement.user, agreement.provider, subscriptions),
        );
        Ok(id)
    }

    /// Agreement ids opened for `user`, oldest first.
    pub fn get_user_subscriptions(env: Env, user: Address) -> Vec<BytesN<32>> {
        env.storage()
            .persistent()
            .get(&DataKey::UserSubscriptions(user))
            .unwrap_or_else(|| Vec::new(&env))
    }

    /// Contract hosting the agreement, if it was opened here. Every agreement
    /// shares this one contract; callers address an agreement by its id.
    pub fn get_subscription(env: Env, agreement_id: BytesN<32>) -> Option<Address> {
        env.storage()
            .persistent()
            .get(&DataKey::Subscription(agreement_id))
    }

    /// Contract holding the user's agent account, if one was created. All
    /// accounts live in this one contract, keyed by their owner address.
    pub fn get_user_agent(env: Env, user: Address) -> Option<Address> {
        let user_agent = Self::user_agent(env.clone()).ok()?;
        if SignerRegistryClient::new(&env, &user_agent).has_agent(&user) {
            Some(user_agent)
        } else {
            None
        }
    }

    pub fn platform_signer(env: Env) -> Address {
        match Self::config(&env, PLATFORM_SIGNER_KEY) {
            Ok(signer) => signer,
            Err(error) => panic_with_error!(&env, error),
        }
    }

    pub fn reserve_pool(env: Env) -> Result<Address, ContractError> {
        Self::config(&env, RESERVE_POOL_KEY)
    }

    pub fn credit_ledger(env: Env) -> Result<Address, ContractError> {
        Self::config(&env, CREDIT_LEDGER_KEY)
    }

    pub fn user_agent(env: Env) -> Result<Address, ContractError> {
        Self::config(&env, USER_AGENT_KEY)
    }

    pub fn subscriptions(env: Env) -> Result<Address, ContractError> {
        Self::config(&env, SUBSCRIPTIONS_KEY)
    }

    pub fn update_platform_signer(
        env: Env,
        admin: Address,
        signer: Address,
    ) -> Result<(), ContractError> {
        Self::update_reference(&env, &admin, PLATFORM_SIGNER_KEY, &signer)
    }

    /// Only agreements opened afterwards use the new pool.
    pub fn update_reserve_pool(env: Env, admin: Address, pool: Address) -> Result<(), ContractError> {
        Self::update_reference(&env, &admin, RESERVE_POOL_KEY, &pool)
    }

    pub fn update_credit_ledger(
        env: Env,
        admin: Address,
        ledger: Address,
    ) -> Result<(), ContractError> {
        Self::update_reference(&env, &admin, CREDIT_LEDGER_KEY, &ledger)
    }

    /// Grant `user` a credit line in the reserve pool. Platform signer only.
    pub fn grant_credit_line(
        env: Env,
        platform: Address,
        user: Address,
        token: Address,
        amount: i128,
    ) -> Result<(), ContractError> {
        platform.require_auth();
        if platform != Self::config(&env, PLATFORM_SIGNER_KEY)? {
            return Err(ContractError::Unauthorized);
        }

        let pool = UnderwritingPoolClient::new(&env, &Self::reserve_pool(env.clone())?);
        match pool.try_grant_credit_line(&env.current_contract_address(), &user, &token, &amount) {
            Ok(Ok(())) => Ok(()),
            Err(Ok(error)) => Err(error),
            _ => Err(ContractError::InvalidInput),
        }
    }

    pub fn agreement_digest(env: Env, agreement: PaymentAgreement) -> BytesN<32> {
        typed_data::agreement_digest(&env, &env.current_contract_address(), &agreement)
    }

    pub fn derive_agreement_id(
        env: Env,
        user: Address,
        provider: Address,
        token: Address,
        amount: i128,
        start_date: u64,
    ) -> BytesN<32> {
        typed_data::derive_agreement_id(&env, &user, &provider, &token, amount, start_date)
    }

    fn validate(env: &Env, agreement: &PaymentAgreement) -> Result<(), ContractError> {
        if address::is_null(env, &agreement.user) {
            return Err(ContractError::InvalidUserAddress);
        }
        if address::is_null(env, &agreement.provider) {
            return Err(ContractError::InvalidProviderAddress);
        }
        if address::is_null(env, &agreement.token) {
            return Err(ContractError::InvalidTokenAddress);
        }
        if agreement.amount <= 0 || agreement.max_cover < 0 {
            return Err(ContractError::InvalidAmount);
        }
        if agreement.period == 0 {
            return Err(ContractError::InvalidPeriod);
        }
        if agreement.start_date <= env.ledger().timestamp() {
            return Err(ContractError::StartDateNotInFuture);
        }

        let derived = typed_data::derive_agreement_id(
            env,
            &agreement.user,
            &agreement.provider,
            &agreement.token,
            agreement.amount,
            agreement.start_date,
        );
        if derived != agreement.agreement_id {
            return Err(ContractError::InvalidAgreementId);
        }
        Ok(())
    }

    fn open_user_agent(env: &Env, registry: &SignerRegistryClient, user: &Address) {
        registry.create_agent(&env.current_contract_address(), user);
        env.events().publish(
            (Symbol::new(env, "user_agent_created"),),
            (user.clone(), registry.address.clone()),
        );
    }

    /// Let the subscription contract mint, draw and consume nonces. Each role
    /// is granted once.
    fn grant_roles(env: &Env, links: &SubscriptionLinks, subscriptions: &Address) {
        let this = env.current_contract_address();

        let ledger = CreditMinterClient::new(env, &links.credit_ledger);
        if !ledger.is_minter(subscriptions) {
            ledger.authorize_minter(&this, subscriptions, &true);
        }

        let pool = UnderwritingPoolClient::new(env, &links.reserve_pool);
        if !pool.is_drawer(subscriptions) {
            pool.authorize_drawer(&this, subscriptions, &true);
        }

        let registry = SignerRegistryClient::new(env, &links.user_agent);
        if !registry.is_consumer(subscriptions) {
            registry.authorize_consumer(&this, subscriptions);
        }
    }

    fn config(env: &Env, key: &str) -> Result<Address, ContractError> {
        env.storage()
            .instance()
            .get(&Symbol::new(env, key))
            .ok_or(ContractError::NotInitialized)
    }

    fn update_reference(
        env: &Env,
        admin: &Address,
        key: &str,
        value: &Address,
    ) -> Result<(), ContractError> {
        admin.require_auth();
        let stored: Address = Self::config(env, ADMIN_KEY)?;
        if admin != &stored {
            return Err(ContractError::Unauthorized);
        }
        if address::is_null(env, value) {
            return Err(ContractError::InvalidAddress);
        }

        env.storage()
            .instance()
            .set(&Symbol::new(env, key), value);
        env.events()
            .publish((Symbol::new(env, "config_updated"), Symbol::new(env, key)), value.clone());
        Ok(())
    }
}
