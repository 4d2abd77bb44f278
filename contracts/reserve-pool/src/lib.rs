#![no_std]

//! Reserve pool: underwriters stake tokens, the platform grants users credit
//! lines against that stake, and subscription agreements draw on the lines to
//! cover missed payments.
//!
//! Per token the pool tracks `total_staked`, `total_utilized` and the sum of
//! the underwriters' effective caps (`min(stake, utilization_cap)`). A draw may
//! never push `total_utilized` past `min(total_cap, total_staked * max_bps)`,
//! so `total_utilized <= total_staked` holds after every operation.

mod events;

use payguard_lib::{
    address, errors::ContractError, guard, PoolStats, Stake, ADMIN_KEY, BPS_DENOMINATOR,
    DEFAULT_MAX_UTILIZATION_BPS, FACTORY_KEY,
};
use soroban_sdk::{contract, contractimpl, contracttype, token, Address, BytesN, Env, Symbol};

use events::{
    publish_credit_line, publish_draw, publish_repayment, publish_stake_added,
    publish_stake_removed, CreditLineEvent, DrawEvent, RepaymentEvent, StakeEvent,
};

const MAX_UTILIZATION_KEY: &str = "max_util";

#[contracttype]
#[derive(Clone, Debug, Default, Eq, PartialEq)]
struct TokenPool {
    total_staked: i128,
    total_utilized: i128,
    /// Sum of `min(stake, utilization_cap)` over underwriters.
    total_cap: i128,
}

#[contracttype]
#[derive(Clone)]
enum DataKey {
    Pool(Address),
    Stake(Address, Address),
    CreditLine(Address, Address),
    Debt(Address, Address),
    Cover(BytesN<32>),
    Drawer(Address),
}

fn effective_cap(stake: &Stake) -> i128 {
    if stake.utilization_cap < stake.amount {
        stake.utilization_cap
    } else {
        stake.amount
    }
}

#[contract]
pub struct ReservePool;

#[contractimpl]
impl ReservePool {
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
        env.storage().instance().set(
            &Symbol::new(&env, MAX_UTILIZATION_KEY),
            &DEFAULT_MAX_UTILIZATION_BPS,
        );
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

    /// Set the ceiling on utilized / staked, in basis points.
    pub fn set_max_utilization_rate(
        env: Env,
        admin: Address,
        max_bps: u32,
    ) -> Result<(), ContractError> {
        admin.require_auth();
        Self::verify_admin(&env, &admin)?;
        if max_bps > BPS_DENOMINATOR {
            return Err(ContractError::InvalidRate);
        }
        env.storage()
            .instance()
            .set(&Symbol::new(&env, MAX_UTILIZATION_KEY), &max_bps);
        Ok(())
    }

    /// Allow or disallow `drawer` to draw on credit lines. Callable by the
    /// admin or the factory.
    pub fn authorize_drawer(
        env: Env,
        caller: Address,
        drawer: Address,
        allowed: bool,
    ) -> Result<(), ContractError> {
        caller.require_auth();
        Self::verify_admin_or_factory(&env, &caller)?;

        let key = DataKey::Drawer(drawer);
        if allowed {
            env.storage().persistent().set(&key, &true);
        } else {
            env.storage().persistent().remove(&key);
        }
        Ok(())
    }

    pub fn is_drawer(env: Env, drawer: Address) -> bool {
        env.storage()
            .persistent()
            .get(&DataKey::Drawer(drawer))
            .unwrap_or(false)
    }

    /// Stake `amount` of `token`. `utilization_cap` replaces the underwriter's
    /// previous cap for that token.
    pub fn add_stake(
        env: Env,
        underwriter: Address,
        token: Address,
        amount: i128,
        utilization_cap: i128,
    ) -> Result<(), ContractError> {
        underwriter.require_auth();
        if amount <= 0 || utilization_cap < 0 {
            return Err(ContractError::InvalidAmount);
        }

        guard::guarded(&env, || {
            let mut pool = Self::load_pool(&env, &token);
            let mut stake = Self::get_stake(env.clone(), underwriter.clone(), token.clone());
            let old_cap = effective_cap(&stake);

            stake.amount = stake
                .amount
                .checked_add(amount)
                .ok_or(ContractError::OverflowError)?;
            stake.utilization_cap = utilization_cap;

            pool.total_staked = pool
                .total_staked
                .checked_add(amount)
                .ok_or(ContractError::OverflowError)?;
            pool.total_cap = pool
                .total_cap
                .checked_sub(old_cap)
                .and_then(|cap| cap.checked_add(effective_cap(&stake)))
                .ok_or(ContractError::OverflowError)?;

            if pool.total_cap < pool.total_utilized {
                return Err(ContractError::InsufficientAvailableStake);
            }

            env.storage().persistent().set(
                &DataKey::Stake(underwriter.clone(), token.clone()),
                &stake,
            );
            env.storage()
                .persistent()
                .set(&DataKey::Pool(token.clone()), &pool);

            token::Client::new(&env, &token).transfer(
                &underwriter,
                &env.current_contract_address(),
                &amount,
            );

            publish_stake_added(
                &env,
                StakeEvent {
                    underwriter: underwriter.clone(),
                    token: token.clone(),
                    staked: stake.amount,
                    utilization_cap: stake.utilization_cap,
                    total_staked: pool.total_staked,
                },
            );
            Ok(())
        })
    }

    /// Withdraw stake. Fails when the remaining stake, or the remaining
    /// effective cap, would no longer cover what is currently utilized.
    pub fn remove_stake(
        env: Env,
        underwriter: Address,
        token: Address,
        amount: i128,
    ) -> Result<(), ContractError> {
        underwriter.require_auth();
        if amount <= 0 {
            return Err(ContractError::InvalidAmount);
        }

        guard::guarded(&env, || {
            let mut pool = Self::load_pool(&env, &token);
            let mut stake = Self::get_stake(env.clone(), underwriter.clone(), token.clone());
            if stake.amount < amount {
                return Err(ContractError::InsufficientStake);
            }
            let old_cap = effective_cap(&stake);

            stake.amount -= amount;
            pool.total_staked -= amount;
            pool.total_cap = pool.total_cap - old_cap + effective_cap(&stake);

            if pool.total_staked < pool.total_utilized || pool.total_cap < pool.total_utilized {
                return Err(ContractError::InsufficientAvailableStake);
            }

            let key = DataKey::Stake(underwriter.clone(), token.clone());
            if stake.amount == 0 {
                env.storage().persistent().remove(&key);
            } else {
                env.storage().persistent().set(&key, &stake);
            }
            env.storage()
                .persistent()
                .set(&DataKey::Pool(token.clone()), &pool);

            token::Client::new(&env, &token).transfer(
                &env.current_contract_address(),
                &underwriter,
                &amount,
            );

            publish_stake_removed(
                &env,
                StakeEvent {
                    underwriter: underwriter.clone(),
                    token: token.clone(),
                    staked: stake.amount,
                    utilization_cap: stake.utilization_cap,
                    total_staked: pool.total_staked,
                },
            );
            Ok(())
        })
    }

    /// Set the user's credit line for `token`. The line may not exceed the
    /// pool's unutilized stake, nor drop below what the user already owes.
    pub fn grant_credit_line(
        env: Env,
        caller: Address,
        user: Address,
        token: Address,
        amount: i128,
    ) -> Result<(), ContractError> {
        caller.require_auth();
        Self::verify_admin_or_factory(&env, &caller)?;
        if amount < 0 {
            return Err(ContractError::InvalidAmount);
        }

        let pool = Self::load_pool(&env, &token);
        if amount > pool.total_staked - pool.total_utilized {
            return Err(ContractError::InsufficientAvailableStake);
        }
        if amount < Self::get_user_debt(env.clone(), user.clone(), token.clone()) {
            return Err(ContractError::InvalidAmount);
        }

        env.storage().persistent().set(
            &DataKey::CreditLine(user.clone(), token.clone()),
            &amount,
        );

        publish_credit_line(
            &env,
            CreditLineEvent {
                user,
                token,
                credit_line: amount,
            },
        );
        Ok(())
    }

    /// Advance `amount` to `recipient` on behalf of `user` for one agreement.
    /// Returns the user's debt after the draw.
    ///
    /// # Errors
    /// - `Unauthorized` unless `drawer` is the factory or an authorized drawer
    /// - `CreditLineExceeded` if the user's debt would pass their line
    /// - `MaxCoverExceeded` if the agreement's cumulative cover would pass `max_cover`
    /// - `UtilizationCapExceeded` if the pool would pass its utilization limit
    #[allow(clippy::too_many_arguments)]
    pub fn draw(
        env: Env,
        drawer: Address,
        agreement_id: BytesN<32>,
        user: Address,
        token: Address,
        amount: i128,
        max_cover: i128,
        recipient: Address,
    ) -> Result<i128, ContractError> {
        drawer.require_auth();
        if !Self::is_drawer(env.clone(), drawer.clone()) {
            Self::verify_admin_or_factory(&env, &drawer)?;
        }
        if amount <= 0 {
            return Err(ContractError::InvalidAmount);
        }

        guard::guarded(&env, || {
            let line = Self::get_credit_line(env.clone(), user.clone(), token.clone());
            let debt = Self::get_user_debt(env.clone(), user.clone(), token.clone())
                .checked_add(amount)
                .ok_or(ContractError::OverflowError)?;
            if debt > line {
                return Err(ContractError::CreditLineExceeded);
            }

            let cover = Self::get_agreement_cover(env.clone(), agreement_id.clone())
                .checked_add(amount)
                .ok_or(ContractError::OverflowError)?;
            if cover > max_cover {
                return Err(ContractError::MaxCoverExceeded);
            }

            let mut pool = Self::load_pool(&env, &token);
            let utilized = pool
                .total_utilized
                .checked_add(amount)
                .ok_or(ContractError::OverflowError)?;
            if utilized > Self::utilization_limit(&env, &pool)? {
                return Err(ContractError::UtilizationCapExceeded);
            }
            pool.total_utilized = utilized;

            env.storage()
                .persistent()
                .set(&DataKey::Debt(user.clone(), token.clone()), &debt);
            env.storage()
                .persistent()
                .set(&DataKey::Cover(agreement_id.clone()), &cover);
            env.storage()
                .persistent()
                .set(&DataKey::Pool(token.clone()), &pool);

            token::Client::new(&env, &token).transfer(
                &env.current_contract_address(),
                &recipient,
                &amount,
            );

            publish_draw(
                &env,
                DrawEvent {
                    agreement_id: agreement_id.clone(),
                    user: user.clone(),
                    token: token.clone(),
                    amount,
                    user_debt: debt,
                    total_utilized: pool.total_utilized,
                },
            );
            Ok(debt)
        })
    }

    /// Pay back part or all of a user's debt. Anyone may repay on the user's
    /// behalf.
    pub fn repay(
        env: Env,
        payer: Address,
        user: Address,
        token: Address,
        amount: i128,
    ) -> Result<i128, ContractError> {
        payer.require_auth();
        let debt = Self::get_user_debt(env.clone(), user.clone(), token.clone());
        if amount <= 0 || amount > debt {
            return Err(ContractError::InvalidAmount);
        }

        guard::guarded(&env, || {
            let remaining = debt - amount;
            let mut pool = Self::load_pool(&env, &token);
            pool.total_utilized -= amount;

            let key = DataKey::Debt(user.clone(), token.clone());
            if remaining == 0 {
                env.storage().persistent().remove(&key);
            } else {
                env.storage().persistent().set(&key, &remaining);
            }
            env.storage()
                .persistent()
                .set(&DataKey::Pool(token.clone()), &pool);

            token::Client::new(&env, &token).transfer(
                &payer,
                &env.current_contract_address(),
                &amount,
            );

            publish_repayment(
                &env,
                RepaymentEvent {
                    payer: payer.clone(),
                    user: user.clone(),
                    token: token.clone(),
                    amount,
                    user_debt: remaining,
                },
            );
            Ok(remaining)
        })
    }

    pub fn get_pool_stats(env: Env, token: Address) -> PoolStats {
        let pool = Self::load_pool(&env, &token);
        let max_utilization_rate = Self::max_utilization_bps(&env);
        let utilization_rate = Self::utilization_bps(&pool);
        let available_capacity = Self::available_capacity(&env, &pool);

        PoolStats {
            total_staked: pool.total_staked,
            total_utilized: pool.total_utilized,
            utilization_rate,
            max_utilization_rate,
            available_capacity,
        }
    }

    /// What a draw for `user` in `token` could currently advance.
    pub fn get_underwriting_capacity(env: Env, user: Address, token: Address) -> i128 {
        let line = Self::get_credit_line(env.clone(), user.clone(), token.clone());
        let debt = Self::get_user_debt(env.clone(), user, token.clone());
        let headroom = if line > debt { line - debt } else { 0 };
        let available = Self::available_capacity(&env, &Self::load_pool(&env, &token));
        if headroom < available {
            headroom
        } else {
            available
        }
    }

    pub fn get_user_debt(env: Env, user: Address, token: Address) -> i128 {
        env.storage()
            .persistent()
            .get(&DataKey::Debt(user, token))
            .unwrap_or(0)
    }

    pub fn get_credit_line(env: Env, user: Address, token: Address) -> i128 {
        env.storage()
            .persistent()
            .get(&DataKey::CreditLine(user, token))
            .unwrap_or(0)
    }

    pub fn get_stake(env: Env, underwriter: Address, token: Address) -> Stake {
        env.storage()
            .persistent()
            .get(&DataKey::Stake(underwriter, token))
            .unwrap_or(Stake {
                amount: 0,
                utilization_cap: 0,
            })
    }

    /// Total advanced so far for one agreement.
    pub fn get_agreement_cover(env: Env, agreement_id: BytesN<32>) -> i128 {
        env.storage()
            .persistent()
            .get(&DataKey::Cover(agreement_id))
            .unwrap_or(0)
    }

    fn load_pool(env: &Env, token: &Address) -> TokenPool {
        env.storage()
            .persistent()
            .get(&DataKey::Pool(token.clone()))
            .unwrap_or_default()
    }

    fn max_utilization_bps(env: &Env) -> u32 {
        env.storage()
            .instance()
            .get(&Symbol::new(env, MAX_UTILIZATION_KEY))
            .unwrap_or(DEFAULT_MAX_UTILIZATION_BPS)
    }

    /// Utilized share of the stake in basis points, saturating at `u32::MAX`.
    fn utilization_bps(pool: &TokenPool) -> u32 {
        if pool.total_staked <= 0 {
            return 0;
        }
        let bps = BPS_DENOMINATOR as i128;
        let rate = match pool.total_utilized.checked_mul(bps) {
            Some(scaled) => scaled / pool.total_staked,
            None => pool.total_utilized / (pool.total_staked / bps).max(1),
        };
        u32::try_from(rate).unwrap_or(u32::MAX)
    }

    fn utilization_limit(env: &Env, pool: &TokenPool) -> Result<i128, ContractError> {
        let by_rate = pool
            .total_staked
            .checked_mul(Self::max_utilization_bps(env) as i128)
            .ok_or(ContractError::OverflowError)?
            / BPS_DENOMINATOR as i128;
        Ok(if pool.total_cap < by_rate {
            pool.total_cap
        } else {
            by_rate
        })
    }

    fn available_capacity(env: &Env, pool: &TokenPool) -> i128 {
        match Self::utilization_limit(env, pool) {
            Ok(limit) if limit > pool.total_utilized => limit - pool.total_utilized,
            _ => 0,
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
