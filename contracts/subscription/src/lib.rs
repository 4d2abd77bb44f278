#![no_std]

//! Subscription agreements and their payment state machine.
//!
//! Each agreement is one record keyed by its agreement id, opened by the
//! factory and mutated only through the entry points below:
//!
//! ```text
//! Active  -> Paused | Cancelled | Defaulted
//! Paused  -> Active | Cancelled
//! ```
//!
//! Cancelled and Defaulted are terminal. A payment (direct or pool-covered)
//! appends the history entry for `current_period`, then advances the period by
//! one and `next_payment_due` by exactly one `period`.

mod events;

use payguard_lib::{
    errors::ContractError,
    guard,
    interfaces::{
        CreditMinterClient, PlatformConfigClient, SignatureValidatorClient, SignerRegistryClient,
        UnderwritingPoolClient,
    },
    typed_data, ClaimOutcome, DebtStatus, PaymentAgreement, PaymentRecord, SignerProof,
    SubscriptionInfo, SubscriptionLinks, SubscriptionStatus, FACTORY_KEY, MAX_STRING_LENGTH,
    SIGNATURE_MAGIC_VALID,
};
use soroban_sdk::{
    contract, contractimpl, contracttype, log, token, Address, BytesN, Env, String, Symbol, Vec,
};

use events::{
    publish_cancelled, publish_defaulted, publish_dispute_raised, publish_opened,
    publish_payment_made, publish_status_changed, CancelledEvent, DefaultedEvent,
    DisputeRaisedEvent, OpenedEvent, PaymentMadeEvent,
};

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
struct AgreementState {
    terms: PaymentAgreement,
    links: SubscriptionLinks,
    status: SubscriptionStatus,
    next_payment_due: u64,
    /// 1-based number of the next unpaid period.
    current_period: u32,
    total_paid: i128,
    total_from_pool: i128,
}

#[contracttype]
#[derive(Clone)]
enum DataKey {
    Agreement(BytesN<32>),
    Payment(BytesN<32>, u32),
}

fn load(env: &Env, agreement_id: &BytesN<32>) -> Result<AgreementState, ContractError> {
    env.storage()
        .persistent()
        .get(&DataKey::Agreement(agreement_id.clone()))
        .ok_or(ContractError::NotFound)
}

fn save(env: &Env, agreement_id: &BytesN<32>, state: &AgreementState) {
    env.storage()
        .persistent()
        .set(&DataKey::Agreement(agreement_id.clone()), state);
}

fn save_payment(env: &Env, agreement_id: &BytesN<32>, record: &PaymentRecord) {
    env.storage()
        .persistent()
        .set(&DataKey::Payment(agreement_id.clone(), record.period), record);
}

fn require_status(state: &AgreementState, expected: SubscriptionStatus) -> Result<(), ContractError> {
    if state.status.is_terminal() {
        return Err(ContractError::SubscriptionTerminated);
    }
    if state.status != expected {
        return Err(ContractError::InvalidStatus);
    }
    Ok(())
}

/// The owner, or one of the owner's currently authorized agents.
fn require_payer(env: &Env, state: &AgreementState, caller: &Address) -> Result<(), ContractError> {
    caller.require_auth();
    if caller == &state.terms.user {
        return Ok(());
    }
    let registry = SignerRegistryClient::new(env, &state.links.user_agent);
    if registry.is_authorized_signer(&state.terms.user, caller) {
        Ok(())
    } else {
        Err(ContractError::Unauthorized)
    }
}

/// Close out the current period and move the schedule forward by one period.
fn advance(state: &mut AgreementState) -> Result<(), ContractError> {
    state.current_period = state
        .current_period
        .checked_add(1)
        .ok_or(ContractError::OverflowError)?;
    state.next_payment_due = state
        .next_payment_due
        .checked_add(state.terms.period)
        .ok_or(ContractError::OverflowError)?;
    Ok(())
}

#[contract]
pub struct SubscriptionAgreement;

#[contractimpl]
impl SubscriptionAgreement {
    pub fn init(env: Env, factory: Address) -> Result<(), ContractError> {
        if env
            .storage()
            .instance()
            .has(&Symbol::new(&env, FACTORY_KEY))
        {
            return Err(ContractError::AlreadyInitialized);
        }
        factory.require_auth();
        env.storage()
            .instance()
            .set(&Symbol::new(&env, FACTORY_KEY), &factory);
        Ok(())
    }

    pub fn factory(env: Env) -> Result<Address, ContractError> {
        env.storage()
            .instance()
            .get(&Symbol::new(&env, FACTORY_KEY))
            .ok_or(ContractError::NotInitialized)
    }

    /// Open an agreement in `Active` status with its first payment due at
    /// `start_date`. Only the factory may open agreements, and each id opens
    /// at most once.
    pub fn open(
        env: Env,
        factory: Address,
        terms: PaymentAgreement,
        links: SubscriptionLinks,
    ) -> Result<(), ContractError> {
        factory.require_auth();
        if factory != Self::factory(env.clone())? {
            return Err(ContractError::Unauthorized);
        }

        let key = DataKey::Agreement(terms.agreement_id.clone());
        if env.storage().persistent().has(&key) {
            return Err(ContractError::AlreadyInitialized);
        }

        let state = AgreementState {
            next_payment_due: terms.start_date,
            terms,
            links,
            status: SubscriptionStatus::Active,
            current_period: 1,
            total_paid: 0,
            total_from_pool: 0,
        };
        env.storage().persistent().set(&key, &state);

        publish_opened(
            &env,
            OpenedEvent {
                agreement_id: state.terms.agreement_id.clone(),
                user: state.terms.user.clone(),
                provider: state.terms.provider.clone(),
                first_due: state.next_payment_due,
            },
        );
        Ok(())
    }

    /// Pay the current period from `caller` to the provider.
    ///
    /// Allowed from the due date on, including after the grace period has
    /// elapsed. Bookkeeping is written before the token transfer and the
    /// credit mint.
    ///
    /// # Errors
    /// - `Unauthorized` unless `caller` is the owner or an authorized agent
    /// - `InvalidStatus` / `SubscriptionTerminated` unless the agreement is active
    /// - `PaymentNotDue` before `next_payment_due`
    pub fn pay(env: Env, agreement_id: BytesN<32>, caller: Address) -> Result<u32, ContractError> {
        let mut state = load(&env, &agreement_id)?;
        require_payer(&env, &state, &caller)?;
        require_status(&state, SubscriptionStatus::Active)?;

        let now = env.ledger().timestamp();
        if now < state.next_payment_due {
            return Err(ContractError::PaymentNotDue);
        }

        guard::guarded(&env, || {
            let amount = state.terms.amount;
            let mut record = PaymentRecord {
                period: state.current_period,
                due_date: state.next_payment_due,
                paid_date: now,
                amount,
                from_pool: false,
                payer: Some(caller.clone()),
                credit_record_id: 0,
                dispute_reason: None,
            };
            state.total_paid = state
                .total_paid
                .checked_add(amount)
                .ok_or(ContractError::OverflowError)?;
            advance(&mut state)?;
            save(&env, &agreement_id, &state);
            save_payment(&env, &agreement_id, &record);

            token::Client::new(&env, &state.terms.token).transfer(
                &caller,
                &state.terms.provider,
                &amount,
            );
            record.credit_record_id = CreditMinterClient::new(&env, &state.links.credit_ledger)
                .mint(
                    &env.current_contract_address(),
                    &state.terms.user,
                    &agreement_id,
                    &amount,
                    &false,
                );
            save_payment(&env, &agreement_id, &record);

            publish_payment_made(
                &env,
                PaymentMadeEvent {
                    agreement_id: agreement_id.clone(),
                    period: record.period,
                    amount,
                    payer: record.payer.clone(),
                    from_pool: false,
                    credit_record_id: record.credit_record_id,
                },
            );
            Ok(record.period)
        })
    }

    /// Ask the reserve pool to cover the current period once its grace period
    /// has fully elapsed. Only the factory's platform signer may claim.
    ///
    /// A draw the pool refuses for lack of capacity moves the agreement to
    /// `Defaulted` and records the period as unpaid; that outcome is returned,
    /// not raised. Any other pool failure is raised and nothing changes.
    pub fn claim_from_pool(
        env: Env,
        agreement_id: BytesN<32>,
        relayer: Address,
    ) -> Result<ClaimOutcome, ContractError> {
        relayer.require_auth();
        let platform = PlatformConfigClient::new(&env, &Self::factory(env.clone())?).platform_signer();
        if relayer != platform {
            return Err(ContractError::Unauthorized);
        }

        let mut state = load(&env, &agreement_id)?;
        require_status(&state, SubscriptionStatus::Active)?;
        if !Self::claimable(&env, &agreement_id, &state) {
            return Err(ContractError::PoolClaimNotAllowed);
        }

        guard::guarded(&env, || {
            let now = env.ledger().timestamp();
            let amount = state.terms.amount;
            let period = state.current_period;
            let due_date = state.next_payment_due;

            let pool = UnderwritingPoolClient::new(&env, &state.links.reserve_pool);
            let drawn = pool.try_draw(
                &env.current_contract_address(),
                &agreement_id,
                &state.terms.user,
                &state.terms.token,
                &amount,
                &state.terms.max_cover,
                &state.terms.provider,
            );

            let refused = match drawn {
                Ok(Ok(_)) => false,
                Err(Ok(
                    ContractError::CreditLineExceeded
                    | ContractError::MaxCoverExceeded
                    | ContractError::UtilizationCapExceeded,
                )) => true,
                Err(Ok(error)) => return Err(error),
                _ => return Err(ContractError::PoolUnavailable),
            };

            if refused {
                log!(&env, "pool cover refused", agreement_id, period);
                let record = PaymentRecord {
                    period,
                    due_date,
                    paid_date: 0,
                    amount,
                    from_pool: false,
                    payer: None,
                    credit_record_id: 0,
                    dispute_reason: None,
                };
                save_payment(&env, &agreement_id, &record);

                let old_status = state.status;
                state.status = SubscriptionStatus::Defaulted;
                save(&env, &agreement_id, &state);

                publish_status_changed(&env, &agreement_id, old_status, state.status);
                publish_defaulted(
                    &env,
                    DefaultedEvent {
                        agreement_id: agreement_id.clone(),
                        period,
                        amount,
                    },
                );
                return Ok(ClaimOutcome::Defaulted);
            }

            let mut record = PaymentRecord {
                period,
                due_date,
                paid_date: now,
                amount,
                from_pool: true,
                payer: None,
                credit_record_id: 0,
                dispute_reason: None,
            };
            state.total_from_pool = state
                .total_from_pool
                .checked_add(amount)
                .ok_or(ContractError::OverflowError)?;
            advance(&mut state)?;
            save(&env, &agreement_id, &state);
            save_payment(&env, &agreement_id, &record);

            record.credit_record_id = CreditMinterClient::new(&env, &state.links.credit_ledger)
                .mint(
                    &env.current_contract_address(),
                    &state.terms.user,
                    &agreement_id,
                    &amount,
                    &true,
                );
            save_payment(&env, &agreement_id, &record);

            publish_payment_made(
                &env,
                PaymentMadeEvent {
                    agreement_id: agreement_id.clone(),
                    period,
                    amount,
                    payer: None,
                    from_pool: true,
                    credit_record_id: record.credit_record_id,
                },
            );
            Ok(ClaimOutcome::Covered)
        })
    }

    pub fn pause(env: Env, agreement_id: BytesN<32>, caller: Address) -> Result<(), ContractError> {
        Self::transition(
            &env,
            &agreement_id,
            &caller,
            SubscriptionStatus::Active,
            SubscriptionStatus::Paused,
        )
    }

    /// Resume a paused agreement. The due date is left where it was.
    pub fn resume(env: Env, agreement_id: BytesN<32>, caller: Address) -> Result<(), ContractError> {
        Self::transition(
            &env,
            &agreement_id,
            &caller,
            SubscriptionStatus::Paused,
            SubscriptionStatus::Active,
        )
    }

    /// Cancel on the strength of a signature from the owner or one of its
    /// agents over `CancelSubscription{agreement_id, nonce, timestamp}`.
    /// `nonce` must equal the signer's current counter and is consumed.
    pub fn cancel_by_user(
        env: Env,
        agreement_id: BytesN<32>,
        proof: SignerProof,
        nonce: u64,
        timestamp: u64,
    ) -> Result<(), ContractError> {
        let mut state = load(&env, &agreement_id)?;
        if state.status.is_terminal() {
            return Err(ContractError::SubscriptionTerminated);
        }

        let digest = typed_data::cancel_digest(
            &env,
            &env.current_contract_address(),
            &agreement_id,
            nonce,
            timestamp,
        );
        // Only the valid magic value is accepted; validator failures reject.
        let validator = SignatureValidatorClient::new(&env, &state.links.user_agent);
        match validator.try_is_valid_signature(&state.terms.user, &digest, &proof) {
            Ok(Ok(SIGNATURE_MAGIC_VALID)) => {}
            _ => return Err(ContractError::InvalidSignature),
        }

        let registry = SignerRegistryClient::new(&env, &state.links.user_agent);
        match registry.try_consume_nonce(
            &env.current_contract_address(),
            &state.terms.user,
            &proof.signer,
            &nonce,
        ) {
            Ok(Ok(_)) => {}
            Err(Ok(error)) => return Err(error),
            _ => return Err(ContractError::InvalidNonce),
        }

        let old_status = state.status;
        state.status = SubscriptionStatus::Cancelled;
        save(&env, &agreement_id, &state);

        publish_status_changed(&env, &agreement_id, old_status, state.status);
        publish_cancelled(
            &env,
            CancelledEvent {
                agreement_id,
                cancelled_by: proof.signer,
            },
        );
        Ok(())
    }

    /// Provider-initiated cancellation from any non-terminal status.
    pub fn emergency_cancel(
        env: Env,
        agreement_id: BytesN<32>,
        caller: Address,
    ) -> Result<(), ContractError> {
        caller.require_auth();
        let mut state = load(&env, &agreement_id)?;
        if caller != state.terms.provider {
            return Err(ContractError::Unauthorized);
        }
        if state.status.is_terminal() {
            return Err(ContractError::SubscriptionTerminated);
        }

        let old_status = state.status;
        state.status = SubscriptionStatus::Cancelled;
        save(&env, &agreement_id, &state);

        publish_status_changed(&env, &agreement_id, old_status, state.status);
        publish_cancelled(
            &env,
            CancelledEvent {
                agreement_id,
                cancelled_by: caller,
            },
        );
        Ok(())
    }

    /// Attach a dispute reason to a paid period. Each period can be disputed once.
    pub fn raise_dispute(
        env: Env,
        agreement_id: BytesN<32>,
        caller: Address,
        period: u32,
        reason: String,
    ) -> Result<(), ContractError> {
        let state = load(&env, &agreement_id)?;
        require_payer(&env, &state, &caller)?;
        if reason.len() == 0 || reason.len() > MAX_STRING_LENGTH {
            return Err(ContractError::InvalidInput);
        }

        let mut record = Self::get_payment_info(env.clone(), agreement_id.clone(), period)
            .filter(|record| record.paid_date != 0)
            .ok_or(ContractError::NoPaymentForPeriod)?;
        if record.dispute_reason.is_some() {
            return Err(ContractError::DisputeAlreadyRaised);
        }

        record.dispute_reason = Some(reason.clone());
        save_payment(&env, &agreement_id, &record);

        publish_dispute_raised(
            &env,
            DisputeRaisedEvent {
                agreement_id,
                period,
                reason,
            },
        );
        Ok(())
    }

    pub fn is_payment_due(env: Env, agreement_id: BytesN<32>) -> bool {
        match load(&env, &agreement_id) {
            Ok(state) => {
                state.status == SubscriptionStatus::Active
                    && env.ledger().timestamp() >= state.next_payment_due
            }
            Err(_) => false,
        }
    }

    /// `now` in `[next_payment_due, next_payment_due + grace_period)`.
    pub fn is_in_grace_period(env: Env, agreement_id: BytesN<32>) -> bool {
        match load(&env, &agreement_id) {
            Ok(state) => {
                let now = env.ledger().timestamp();
                let grace_end = state
                    .next_payment_due
                    .saturating_add(state.terms.grace_period);
                now >= state.next_payment_due && now < grace_end
            }
            Err(_) => false,
        }
    }

    pub fn can_claim_from_pool(env: Env, agreement_id: BytesN<32>) -> bool {
        match load(&env, &agreement_id) {
            Ok(state) => {
                state.status == SubscriptionStatus::Active
                    && Self::claimable(&env, &agreement_id, &state)
            }
            Err(_) => false,
        }
    }

    pub fn get_subscription_info(
        env: Env,
        agreement_id: BytesN<32>,
    ) -> Result<SubscriptionInfo, ContractError> {
        let state = load(&env, &agreement_id)?;
        Ok(SubscriptionInfo {
            terms: state.terms,
            status: state.status,
            next_payment_due: state.next_payment_due,
            current_period: state.current_period,
            total_paid: state.total_paid,
            total_from_pool: state.total_from_pool,
        })
    }

    pub fn get_payment_info(env: Env, agreement_id: BytesN<32>, period: u32) -> Option<PaymentRecord> {
        env.storage()
            .persistent()
            .get(&DataKey::Payment(agreement_id, period))
    }

    /// History entries ordered by period.
    pub fn get_payment_history(
        env: Env,
        agreement_id: BytesN<32>,
    ) -> Result<Vec<PaymentRecord>, ContractError> {
        let state = load(&env, &agreement_id)?;
        let mut history = Vec::new(&env);
        for period in 1..=state.current_period {
            if let Some(record) = Self::get_payment_info(env.clone(), agreement_id.clone(), period) {
                history.push_back(record);
            }
        }
        Ok(history)
    }

    /// Outstanding pool debt of the agreement's user in its token, with the
    /// next due date. `overdue` ignores the grace period.
    pub fn get_debt_status(env: Env, agreement_id: BytesN<32>) -> Result<DebtStatus, ContractError> {
        let state = load(&env, &agreement_id)?;
        let pool_debt = UnderwritingPoolClient::new(&env, &state.links.reserve_pool)
            .get_user_debt(&state.terms.user, &state.terms.token);
        Ok(DebtStatus {
            pool_debt,
            next_due: state.next_payment_due,
            overdue: env.ledger().timestamp() > state.next_payment_due,
        })
    }

    pub fn cancel_digest(env: Env, agreement_id: BytesN<32>, nonce: u64, timestamp: u64) -> BytesN<32> {
        typed_data::cancel_digest(
            &env,
            &env.current_contract_address(),
            &agreement_id,
            nonce,
            timestamp,
        )
    }

    fn claimable(env: &Env, agreement_id: &BytesN<32>, state: &AgreementState) -> bool {
        let grace_end = state
            .next_payment_due
            .saturating_add(state.terms.grace_period);
        let unpaid = Self::get_payment_info(env.clone(), agreement_id.clone(), state.current_period)
            .map(|record| record.paid_date == 0)
            .unwrap_or(true);
        env.ledger().timestamp() >= grace_end && unpaid
    }

    fn transition(
        env: &Env,
        agreement_id: &BytesN<32>,
        caller: &Address,
        from: SubscriptionStatus,
        to: SubscriptionStatus,
    ) -> Result<(), ContractError> {
        let mut state = load(env, agreement_id)?;
        require_payer(env, &state, caller)?;
        require_status(&state, from)?;

        state.status = to;
        save(env, agreement_id, &state);
        publish_status_changed(env, agreement_id, from, to);
        Ok(())
    }
}

mod test;
