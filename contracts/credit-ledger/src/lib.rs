#![no_std]

//! Soulbound credit ledger: one non-transferable record per successful
//! subscription payment, aggregated into a per-user running score.

use payguard_lib::{
    address, errors::ContractError, CreditRecord, CreditScore, ADMIN_KEY, DIRECT_PAYMENT_POINTS,
    FACTORY_KEY, POOL_PAYMENT_POINTS, RATING_EXCELLENT_THRESHOLD, RATING_FAIR_THRESHOLD,
    RATING_GOOD_THRESHOLD,
};
use soroban_sdk::{
    contract, contractimpl, contracttype, symbol_short, Address, BytesN, Env, String, Symbol, Vec,
};

const RECORD_COUNTER_KEY: &str = "rec_ctr";

#[contracttype]
#[derive(Clone)]
enum DataKey {
    Minter(Address),
    Record(u64),
    UserRecords(Address),
    UserScore(Address),
}

#[contract]
pub struct CreditLedger;

#[contractimpl]
impl CreditLedger {
    /// Initialize contract with admin and the factory allowed to register minters
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
        env.storage()
            .instance()
            .set(&Symbol::new(&env, RECORD_COUNTER_KEY), &0u64);

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
        env.events()
            .publish((symbol_short!("credit"), symbol_short!("factory")), factory);
        Ok(())
    }

    /// Grant or revoke minting rights. Callable by the admin or the factory.
    pub fn authorize_minter(
        env: Env,
        caller: Address,
        minter: Address,
        allowed: bool,
    ) -> Result<(), ContractError> {
        caller.require_auth();
        Self::verify_admin_or_factory(&env, &caller)?;

        let key = DataKey::Minter(minter.clone());
        if allowed {
            env.storage().persistent().set(&key, &true);
        } else {
            env.storage().persistent().remove(&key);
        }

        env.events().publish(
            (symbol_short!("credit"), symbol_short!("minter")),
            (minter, allowed),
        );
        Ok(())
    }

    pub fn is_minter(env: Env, minter: Address) -> bool {
        env.storage()
            .persistent()
            .get(&DataKey::Minter(minter))
            .unwrap_or(false)
    }

    /// Mint one soulbound record for a payment and add its points to the
    /// user's running score.
    ///
    /// # Errors
    /// - `Unauthorized` if `minter` has not been authorized
    /// - `InvalidAmount` if `amount` is not positive
    pub fn mint(
        env: Env,
        minter: Address,
        user: Address,
        subscription: BytesN<32>,
        amount: i128,
        from_pool: bool,
    ) -> Result<u64, ContractError> {
        minter.require_auth();
        if !Self::is_minter(env.clone(), minter.clone()) {
            return Err(ContractError::Unauthorized);
        }
        if amount <= 0 {
            return Err(ContractError::InvalidAmount);
        }

        let counter: u64 = env
            .storage()
            .instance()
            .get(&Symbol::new(&env, RECORD_COUNTER_KEY))
            .unwrap_or(0);
        let record_id = counter.checked_add(1).ok_or(ContractError::OverflowError)?;

        let (points, metadata) = if from_pool {
            (POOL_PAYMENT_POINTS, "pool-covered payment")
        } else {
            (DIRECT_PAYMENT_POINTS, "direct payment")
        };

        let record = CreditRecord {
            id: record_id,
            user: user.clone(),
            subscription: subscription.clone(),
            issuer: minter,
            amount,
            timestamp: env.ledger().timestamp(),
            score: points,
            metadata: String::from_str(&env, metadata),
            soulbound: true,
        };
        env.storage()
            .persistent()
            .set(&DataKey::Record(record_id), &record);

        let mut ids = Self::get_user_points(env.clone(), user.clone());
        ids.push_back(record_id);
        env.storage()
            .persistent()
            .set(&DataKey::UserRecords(user.clone()), &ids);

        // Score only ever grows.
        let score = Self::get_user_score(env.clone(), user.clone())
            .checked_add(points)
            .ok_or(ContractError::OverflowError)?;
        env.storage()
            .persistent()
            .set(&DataKey::UserScore(user.clone()), &score);

        env.storage()
            .instance()
            .set(&Symbol::new(&env, RECORD_COUNTER_KEY), &record_id);

        env.events().publish(
            (symbol_short!("credit"), symbol_short!("minted")),
            (record_id, user, subscription, points, true),
        );

        Ok(record_id)
    }

    /// Records are bound to the user they were minted for.
    pub fn transfer(
        _env: Env,
        _from: Address,
        _to: Address,
        _record_id: u64,
    ) -> Result<(), ContractError> {
        Err(ContractError::SoulboundTransferDisallowed)
    }

    pub fn get_record(env: Env, record_id: u64) -> Option<CreditRecord> {
        env.storage().persistent().get(&DataKey::Record(record_id))
    }

    pub fn owner_of(env: Env, record_id: u64) -> Result<Address, ContractError> {
        Self::get_record(env, record_id)
            .map(|record| record.user)
            .ok_or(ContractError::NotFound)
    }

    pub fn balance_of(env: Env, user: Address) -> u32 {
        Self::get_user_points(env, user).len()
    }

    pub fn total_supply(env: Env) -> u64 {
        env.storage()
            .instance()
            .get(&Symbol::new(&env, RECORD_COUNTER_KEY))
            .unwrap_or(0)
    }

    pub fn get_user_score(env: Env, user: Address) -> u64 {
        env.storage()
            .persistent()
            .get(&DataKey::UserScore(user))
            .unwrap_or(0)
    }

    /// Record ids minted for `user`, oldest first.
    pub fn get_user_points(env: Env, user: Address) -> Vec<u64> {
        env.storage()
            .persistent()
            .get(&DataKey::UserRecords(user))
            .unwrap_or_else(|| Vec::new(&env))
    }

    pub fn get_user_payment_history(env: Env, user: Address) -> Vec<CreditRecord> {
        let mut history = Vec::new(&env);
        for id in Self::get_user_points(env.clone(), user).iter() {
            if let Some(record) = Self::get_record(env.clone(), id) {
                history.push_back(record);
            }
        }
        history
    }

    pub fn get_credit_score(env: Env, user: Address) -> CreditScore {
        let score = Self::get_user_score(env.clone(), user);
        let rating = if score >= RATING_EXCELLENT_THRESHOLD {
            "Excellent"
        } else if score >= RATING_GOOD_THRESHOLD {
            "Good"
        } else if score >= RATING_FAIR_THRESHOLD {
            "Fair"
        } else if score > 0 {
            "Building"
        } else {
            "No History"
        };

        CreditScore {
            score,
            rating: String::from_str(&env, rating),
        }
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

    fn verify_admin_or_factory(env: &Env, caller: &Address) -> Result<(), ContractError> {
        if Self::verify_admin(env, caller).is_ok() {
            return Ok(());
        }
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
