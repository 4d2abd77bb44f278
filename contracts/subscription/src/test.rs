#![cfg(test)]
extern crate std;

use super::*;
use credit_ledger::{CreditLedger, CreditLedgerClient};
use payguard_lib::testutils::TestSigner;
use reserve_pool::{ReservePool, ReservePoolClient};
use crate::events::{
    CancelledEvent, DefaultedEvent, DisputeRaisedEvent, PaymentMadeEvent, StatusChangedEvent,
};
use soroban_sdk::testutils::{Address as _, Events, Ledger};
use soroban_sdk::{
    contract, contractimpl, symbol_short, Address, Env, IntoVal, String, TryFromVal, Val,
};
use user_agent::{UserAgent, UserAgentClient};

const START: u64 = 1_000_000;
const PERIOD: u64 = 2_592_000;
const GRACE: u64 = 86_400;
const AMOUNT: i128 = 10;

/// Stands in for the agreement factory: it only has to answer who the
/// platform signer is.
#[contract]
pub struct MockFactory;

#[contractimpl]
impl MockFactory {
    pub fn set_platform_signer(env: Env, signer: Address) {
        env.storage()
            .instance()
            .set(&symbol_short!("platform"), &signer);
    }

    pub fn platform_signer(env: Env) -> Address {
        env.storage()
            .instance()
            .get(&symbol_short!("platform"))
            .unwrap()
    }
}

struct Setup<'a> {
    env: Env,
    client: SubscriptionAgreementClient<'a>,
    ledger: CreditLedgerClient<'a>,
    pool: ReservePoolClient<'a>,
    agents: UserAgentClient<'a>,
    factory: Address,
    relayer: Address,
    user: TestSigner,
    provider: Address,
    token: Address,
    links: SubscriptionLinks,
    terms: PaymentAgreement,
}

fn create_contract<'a>(e: &Env) -> SubscriptionAgreementClient<'a> {
    let contract_id = e.register_contract(None, SubscriptionAgreement);
    SubscriptionAgreementClient::new(e, &contract_id)
}

fn terms_for(e: &Env, user: &Address, provider: &Address, token: &Address, start: u64) -> PaymentAgreement {
    PaymentAgreement {
        agreement_id: typed_data::derive_agreement_id(e, user, provider, token, AMOUNT, start),
        user: user.clone(),
        provider: provider.clone(),
        token: token.clone(),
        amount: AMOUNT,
        period: PERIOD,
        start_date: start,
        grace_period: GRACE,
        max_cover: 100,
        nonce: 0,
    }
}

fn setup<'a>() -> Setup<'a> {
    let env = Env::default();
    env.mock_all_auths();
    env.budget().reset_unlimited();
    env.ledger().set_timestamp(START - 3_600);

    let admin = Address::generate(&env);
    let relayer = Address::generate(&env);
    let factory = env.register_contract(None, MockFactory);
    MockFactoryClient::new(&env, &factory).set_platform_signer(&relayer);

    let client = create_contract(&env);
    client.init(&factory);

    let ledger = CreditLedgerClient::new(&env, &env.register_contract(None, CreditLedger));
    ledger.init(&admin, &factory);
    ledger.authorize_minter(&factory, &client.address, &true);

    let pool = ReservePoolClient::new(&env, &env.register_contract(None, ReservePool));
    pool.init(&admin, &factory);
    pool.authorize_drawer(&factory, &client.address, &true);

    let agents = UserAgentClient::new(&env, &env.register_contract(None, UserAgent));
    agents.init(&admin, &factory);
    agents.authorize_consumer(&factory, &client.address);

    let user = TestSigner::new(&env, 1);
    agents.register_signing_key(&user.address, &user.public_key(&env));
    agents.create_agent(&factory, &user.address);

    let provider = Address::generate(&env);
    let token_admin = Address::generate(&env);
    let token = env.register_stellar_asset_contract_v2(token_admin).address();
    token::StellarAssetClient::new(&env, &token).mint(&user.address, &1_000);

    let links = SubscriptionLinks {
        reserve_pool: pool.address.clone(),
        credit_ledger: ledger.address.clone(),
        user_agent: agents.address.clone(),
    };
    let terms = terms_for(&env, &user.address, &provider, &token, START);
    client.open(&factory, &terms, &links);

    Setup {
        env,
        client,
        ledger,
        pool,
        agents,
        factory,
        relayer,
        user,
        provider,
        token,
        links,
        terms,
    }
}

fn fund_pool(s: &Setup, line: i128) {
    let underwriter = Address::generate(&s.env);
    token::StellarAssetClient::new(&s.env, &s.token).mint(&underwriter, &1_000);
    s.pool.add_stake(&underwriter, &s.token, &1_000, &500);
    s.pool
        .grant_credit_line(&s.factory, &s.user.address, &s.token, &line);
}

fn balance(s: &Setup, who: &Address) -> i128 {
    token::Client::new(&s.env, &s.token).balance(who)
}

/// Payload of the most recent `("sub", kind)` event from the agreement contract.
fn last_sub_event<T: TryFromVal<Env, Val>>(s: &Setup, kind: Symbol) -> Option<T> {
    let topics: Vec<Val> = (symbol_short!("sub"), kind).into_val(&s.env);
    s.env
        .events()
        .all()
        .iter()
        .filter(|(emitter, event_topics, _)| {
            *emitter == s.client.address && *event_topics == topics
        })
        .last()
        .and_then(|(_, _, data)| T::try_from_val(&s.env, &data).ok())
}

fn id(s: &Setup) -> BytesN<32> {
    s.terms.agreement_id.clone()
}

#[test]
fn test_init_and_open_are_one_time() {
    let s = setup();
    let result = s.client.try_init(&s.factory);
    assert_eq!(result.err(), Some(Ok(ContractError::AlreadyInitialized)));

    let result = s.client.try_open(&s.factory, &s.terms, &s.links);
    assert_eq!(result.err(), Some(Ok(ContractError::AlreadyInitialized)));

    let stranger = Address::generate(&s.env);
    let other = terms_for(&s.env, &s.user.address, &s.provider, &s.token, START + 1);
    let result = s.client.try_open(&stranger, &other, &s.links);
    assert_eq!(result.err(), Some(Ok(ContractError::Unauthorized)));

    let info = s.client.get_subscription_info(&id(&s));
    assert_eq!(info.status, SubscriptionStatus::Active);
    assert_eq!(info.next_payment_due, START);
    assert_eq!(info.current_period, 1);
}

#[test]
fn test_pay_on_due_date() {
    let s = setup();
    s.env.ledger().set_timestamp(START);
    assert!(s.client.is_payment_due(&id(&s)));

    let period = s.client.pay(&id(&s), &s.user.address);
    let paid: PaymentMadeEvent = last_sub_event(&s, symbol_short!("paid")).unwrap();
    assert_eq!(period, 1);
    assert_eq!(paid.agreement_id, id(&s));
    assert_eq!(paid.period, 1);
    assert_eq!(paid.amount, AMOUNT);
    assert_eq!(paid.payer, Some(s.user.address.clone()));
    assert!(!paid.from_pool);
    assert_eq!(balance(&s, &s.provider), AMOUNT);
    assert_eq!(balance(&s, &s.user.address), 1_000 - AMOUNT);

    let info = s.client.get_subscription_info(&id(&s));
    assert_eq!(info.next_payment_due, START + PERIOD);
    assert_eq!(info.current_period, 2);
    assert_eq!(info.total_paid, AMOUNT);

    let record = s.client.get_payment_info(&id(&s), &1).unwrap();
    assert_eq!(record.paid_date, START);
    assert_eq!(record.payer, Some(s.user.address.clone()));
    assert!(!record.from_pool);
    assert_eq!(record.credit_record_id, paid.credit_record_id);
    assert_eq!(s.ledger.owner_of(&record.credit_record_id), s.user.address);
    assert!(s.ledger.get_user_score(&s.user.address) > 0);

    // Next period is a month out.
    let result = s.client.try_pay(&id(&s), &s.user.address);
    assert_eq!(result.err(), Some(Ok(ContractError::PaymentNotDue)));
}

#[test]
fn test_pay_before_start_fails() {
    let s = setup();
    assert!(!s.client.is_payment_due(&id(&s)));
    let result = s.client.try_pay(&id(&s), &s.user.address);
    assert_eq!(result.err(), Some(Ok(ContractError::PaymentNotDue)));
}

#[test]
fn test_pay_requires_owner_or_agent() {
    let s = setup();
    s.env.ledger().set_timestamp(START);

    let result = s.client.try_pay(&id(&s), &s.provider);
    assert_eq!(result.err(), Some(Ok(ContractError::Unauthorized)));

    let agent = Address::generate(&s.env);
    token::StellarAssetClient::new(&s.env, &s.token).mint(&agent, &AMOUNT);
    s.agents.authorize_agent(&s.user.address, &agent, &true);
    s.client.pay(&id(&s), &agent);

    let record = s.client.get_payment_info(&id(&s), &1).unwrap();
    assert_eq!(record.payer, Some(agent.clone()));
    assert_eq!(balance(&s, &agent), 0);
}

#[test]
fn test_grace_window_boundaries() {
    let s = setup();
    s.env.ledger().set_timestamp(START);
    s.client.pay(&id(&s), &s.user.address);

    let due = START + PERIOD;
    s.env.ledger().set_timestamp(due - 1);
    assert!(!s.client.is_in_grace_period(&id(&s)));

    s.env.ledger().set_timestamp(due);
    assert!(s.client.is_in_grace_period(&id(&s)));
    assert!(!s.client.can_claim_from_pool(&id(&s)));

    s.env.ledger().set_timestamp(due + GRACE - 1);
    assert!(s.client.is_in_grace_period(&id(&s)));
    assert!(!s.client.can_claim_from_pool(&id(&s)));

    s.env.ledger().set_timestamp(due + GRACE);
    assert!(!s.client.is_in_grace_period(&id(&s)));
    assert!(s.client.can_claim_from_pool(&id(&s)));

    // Paying late is still allowed and moves the schedule by exactly one period.
    s.client.pay(&id(&s), &s.user.address);
    let info = s.client.get_subscription_info(&id(&s));
    assert_eq!(info.next_payment_due, due + PERIOD);
    assert!(!s.client.can_claim_from_pool(&id(&s)));
}

#[test]
fn test_history_is_sequential() {
    let s = setup();
    for i in 0..3u64 {
        s.env.ledger().set_timestamp(START + i * PERIOD);
        s.client.pay(&id(&s), &s.user.address);
    }

    let history = s.client.get_payment_history(&id(&s));
    assert_eq!(history.len(), 3);
    for (i, record) in history.iter().enumerate() {
        assert_eq!(record.period, i as u32 + 1);
        assert_eq!(record.due_date, START + i as u64 * PERIOD);
    }
    assert_eq!(s.client.get_subscription_info(&id(&s)).total_paid, 3 * AMOUNT);
    assert_eq!(s.ledger.balance_of(&s.user.address), 3);
}

#[test]
fn test_pool_claim_covers_missed_payment() {
    let s = setup();
    fund_pool(&s, 200);
    s.env.ledger().set_timestamp(START + GRACE);

    let outcome = s.client.claim_from_pool(&id(&s), &s.relayer);
    let paid: PaymentMadeEvent = last_sub_event(&s, symbol_short!("paid")).unwrap();
    assert_eq!(outcome, ClaimOutcome::Covered);
    assert_eq!(paid.payer, None);
    assert!(paid.from_pool);
    assert_eq!(paid.period, 1);
    assert!(paid.credit_record_id > 0);
    assert_eq!(balance(&s, &s.provider), AMOUNT);

    let record = s.client.get_payment_info(&id(&s), &1).unwrap();
    assert!(record.from_pool);
    assert_eq!(record.payer, None);
    assert_eq!(record.paid_date, START + GRACE);

    let info = s.client.get_subscription_info(&id(&s));
    assert_eq!(info.status, SubscriptionStatus::Active);
    assert_eq!(info.current_period, 2);
    assert_eq!(info.next_payment_due, START + PERIOD);
    assert_eq!(info.total_from_pool, AMOUNT);
    assert_eq!(info.total_paid, 0);

    assert_eq!(s.ledger.get_user_score(&s.user.address), POOL_POINTS);

    let debt = s.client.get_debt_status(&id(&s));
    assert_eq!(debt.pool_debt, AMOUNT);
    assert_eq!(debt.next_due, START + PERIOD);
    assert!(!debt.overdue);
}

const POOL_POINTS: u64 = payguard_lib::POOL_PAYMENT_POINTS;

#[test]
fn test_pool_claim_preconditions() {
    let s = setup();
    fund_pool(&s, 200);

    s.env.ledger().set_timestamp(START + GRACE - 1);
    let result = s.client.try_claim_from_pool(&id(&s), &s.relayer);
    assert_eq!(result.err(), Some(Ok(ContractError::PoolClaimNotAllowed)));

    s.env.ledger().set_timestamp(START + GRACE);
    let result = s.client.try_claim_from_pool(&id(&s), &s.user.address);
    assert_eq!(result.err(), Some(Ok(ContractError::Unauthorized)));
}

#[test]
fn test_pool_refusal_defaults_subscription() {
    let s = setup();
    // No credit line was granted.
    fund_pool(&s, 0);
    s.env.ledger().set_timestamp(START + GRACE);

    let outcome = s.client.claim_from_pool(&id(&s), &s.relayer);
    let defaulted: DefaultedEvent = last_sub_event(&s, symbol_short!("default")).unwrap();
    let changed: StatusChangedEvent = last_sub_event(&s, symbol_short!("status")).unwrap();
    assert_eq!(outcome, ClaimOutcome::Defaulted);
    assert_eq!(defaulted.agreement_id, id(&s));
    assert_eq!(defaulted.period, 1);
    assert_eq!(defaulted.amount, AMOUNT);
    assert_eq!(changed.old_status, SubscriptionStatus::Active);
    assert_eq!(changed.new_status, SubscriptionStatus::Defaulted);
    assert_eq!(balance(&s, &s.provider), 0);
    assert_eq!(s.pool.get_user_debt(&s.user.address, &s.token), 0);

    let info = s.client.get_subscription_info(&id(&s));
    assert_eq!(info.status, SubscriptionStatus::Defaulted);
    assert_eq!(info.current_period, 1);

    let record = s.client.get_payment_info(&id(&s), &1).unwrap();
    assert_eq!(record.paid_date, 0);

    let result = s.client.try_pay(&id(&s), &s.user.address);
    assert_eq!(result.err(), Some(Ok(ContractError::SubscriptionTerminated)));
    assert!(!s.client.can_claim_from_pool(&id(&s)));
}

#[test]
fn test_pause_and_resume() {
    let s = setup();
    let agent = Address::generate(&s.env);
    s.agents.authorize_agent(&s.user.address, &agent, &true);

    let result = s.client.try_pause(&id(&s), &s.provider);
    assert_eq!(result.err(), Some(Ok(ContractError::Unauthorized)));

    s.client.pause(&id(&s), &agent);
    let changed: StatusChangedEvent = last_sub_event(&s, symbol_short!("status")).unwrap();
    assert_eq!(changed.agreement_id, id(&s));
    assert_eq!(changed.old_status, SubscriptionStatus::Active);
    assert_eq!(changed.new_status, SubscriptionStatus::Paused);
    assert_eq!(
        s.client.get_subscription_info(&id(&s)).status,
        SubscriptionStatus::Paused
    );

    s.env.ledger().set_timestamp(START + 10 * PERIOD);
    assert!(!s.client.is_payment_due(&id(&s)));
    assert!(!s.client.can_claim_from_pool(&id(&s)));
    let result = s.client.try_pay(&id(&s), &s.user.address);
    assert_eq!(result.err(), Some(Ok(ContractError::InvalidStatus)));

    let result = s.client.try_pause(&id(&s), &s.user.address);
    assert_eq!(result.err(), Some(Ok(ContractError::InvalidStatus)));

    s.client.resume(&id(&s), &s.user.address);
    let changed: StatusChangedEvent = last_sub_event(&s, symbol_short!("status")).unwrap();
    assert_eq!(changed.old_status, SubscriptionStatus::Paused);
    assert_eq!(changed.new_status, SubscriptionStatus::Active);
    let info = s.client.get_subscription_info(&id(&s));
    assert_eq!(info.status, SubscriptionStatus::Active);
    assert_eq!(info.next_payment_due, START);
    assert!(s.client.is_payment_due(&id(&s)));

    let result = s.client.try_resume(&id(&s), &s.user.address);
    assert_eq!(result.err(), Some(Ok(ContractError::InvalidStatus)));
}

#[test]
fn test_cancel_by_user_signature() {
    let s = setup();
    let timestamp = s.env.ledger().timestamp();
    let digest = s.client.cancel_digest(&id(&s), &0, &timestamp);
    let proof = s.user.proof(&s.env, &digest);

    s.client.cancel_by_user(&id(&s), &proof, &0, &timestamp);
    let cancelled: CancelledEvent = last_sub_event(&s, symbol_short!("cancel")).unwrap();
    let changed: StatusChangedEvent = last_sub_event(&s, symbol_short!("status")).unwrap();
    assert_eq!(cancelled.agreement_id, id(&s));
    assert_eq!(cancelled.cancelled_by, s.user.address);
    assert_eq!(changed.old_status, SubscriptionStatus::Active);
    assert_eq!(changed.new_status, SubscriptionStatus::Cancelled);
    assert_eq!(
        s.client.get_subscription_info(&id(&s)).status,
        SubscriptionStatus::Cancelled
    );
    assert_eq!(s.agents.get_agent_nonce(&s.user.address, &s.user.address), 1);

    let result = s.client.try_cancel_by_user(&id(&s), &proof, &0, &timestamp);
    assert_eq!(result.err(), Some(Ok(ContractError::SubscriptionTerminated)));
}

#[test]
fn test_cancel_rejects_stale_nonce() {
    let s = setup();
    let second = terms_for(&s.env, &s.user.address, &s.provider, &s.token, START + 1);
    s.client.open(&s.factory, &second, &s.links);

    let timestamp = s.env.ledger().timestamp();
    let digest = s.client.cancel_digest(&id(&s), &0, &timestamp);
    s.client
        .cancel_by_user(&id(&s), &s.user.proof(&s.env, &digest), &0, &timestamp);

    // Nonce 0 is spent for this signer, whichever agreement it targets.
    let stale = s.client.cancel_digest(&second.agreement_id, &0, &timestamp);
    let result = s.client.try_cancel_by_user(
        &second.agreement_id,
        &s.user.proof(&s.env, &stale),
        &0,
        &timestamp,
    );
    assert_eq!(result.err(), Some(Ok(ContractError::InvalidNonce)));

    let fresh = s.client.cancel_digest(&second.agreement_id, &1, &timestamp);
    s.client.cancel_by_user(
        &second.agreement_id,
        &s.user.proof(&s.env, &fresh),
        &1,
        &timestamp,
    );
}

#[test]
fn test_cancel_by_agent_and_stranger() {
    let s = setup();
    let timestamp = s.env.ledger().timestamp();
    let digest = s.client.cancel_digest(&id(&s), &0, &timestamp);

    let stranger = TestSigner::new(&s.env, 9);
    s.agents
        .register_signing_key(&stranger.address, &stranger.public_key(&s.env));
    let result = s.client.try_cancel_by_user(
        &id(&s),
        &stranger.proof(&s.env, &digest),
        &0,
        &timestamp,
    );
    assert_eq!(result.err(), Some(Ok(ContractError::InvalidSignature)));

    let agent = TestSigner::new(&s.env, 2);
    s.agents
        .register_signing_key(&agent.address, &agent.public_key(&s.env));
    s.agents
        .authorize_agent(&s.user.address, &agent.address, &true);
    s.client
        .cancel_by_user(&id(&s), &agent.proof(&s.env, &digest), &0, &timestamp);

    assert_eq!(
        s.client.get_subscription_info(&id(&s)).status,
        SubscriptionStatus::Cancelled
    );
    assert_eq!(s.agents.get_agent_nonce(&s.user.address, &agent.address), 1);
}

#[test]
fn test_emergency_cancel_is_provider_only() {
    let s = setup();
    let result = s.client.try_emergency_cancel(&id(&s), &s.user.address);
    assert_eq!(result.err(), Some(Ok(ContractError::Unauthorized)));

    s.client.pause(&id(&s), &s.user.address);
    s.client.emergency_cancel(&id(&s), &s.provider);
    assert_eq!(
        s.client.get_subscription_info(&id(&s)).status,
        SubscriptionStatus::Cancelled
    );

    let result = s.client.try_emergency_cancel(&id(&s), &s.provider);
    assert_eq!(result.err(), Some(Ok(ContractError::SubscriptionTerminated)));
    let result = s.client.try_resume(&id(&s), &s.user.address);
    assert_eq!(result.err(), Some(Ok(ContractError::SubscriptionTerminated)));
}

#[test]
fn test_dispute_paid_period_once() {
    let s = setup();
    let reason = String::from_str(&s.env, "service outage");

    let result = s
        .client
        .try_raise_dispute(&id(&s), &s.user.address, &1, &reason);
    assert_eq!(result.err(), Some(Ok(ContractError::NoPaymentForPeriod)));

    s.env.ledger().set_timestamp(START);
    s.client.pay(&id(&s), &s.user.address);
    s.client
        .raise_dispute(&id(&s), &s.user.address, &1, &reason);
    let dispute: DisputeRaisedEvent = last_sub_event(&s, symbol_short!("dispute")).unwrap();
    assert_eq!(dispute.period, 1);
    assert_eq!(dispute.reason, reason);

    let record = s.client.get_payment_info(&id(&s), &1).unwrap();
    assert_eq!(record.dispute_reason, Some(reason.clone()));

    let result = s
        .client
        .try_raise_dispute(&id(&s), &s.user.address, &1, &reason);
    assert_eq!(result.err(), Some(Ok(ContractError::DisputeAlreadyRaised)));

    let result = s
        .client
        .try_raise_dispute(&id(&s), &s.provider, &1, &reason);
    assert_eq!(result.err(), Some(Ok(ContractError::Unauthorized)));
}

#[test]
fn test_debt_status_overdue_ignores_grace() {
    let s = setup();
    s.env.ledger().set_timestamp(START);
    assert!(!s.client.get_debt_status(&id(&s)).overdue);

    s.env.ledger().set_timestamp(START + 1);
    let status = s.client.get_debt_status(&id(&s));
    assert!(status.overdue);
    assert_eq!(status.pool_debt, 0);
    assert!(s.client.is_in_grace_period(&id(&s)));
}

#[test]
fn test_cancel_with_forged_signature_is_rejected() {
    let s = setup();
    let timestamp = s.env.ledger().timestamp();
    let digest = s.client.cancel_digest(&id(&s), &0, &timestamp);

    let forger = TestSigner::new(&s.env, 8);
    let forged = SignerProof {
        signer: s.user.address.clone(),
        signature: forger.sign(&s.env, &digest),
    };
    let result = s.client.try_cancel_by_user(&id(&s), &forged, &0, &timestamp);
    assert_eq!(result.err(), Some(Ok(ContractError::InvalidSignature)));
    assert_eq!(
        s.client.get_subscription_info(&id(&s)).status,
        SubscriptionStatus::Active
    );
    assert_eq!(s.agents.get_agent_nonce(&s.user.address, &s.user.address), 0);
}

#[test]
fn test_pool_misconfiguration_does_not_default() {
    let s = setup();
    fund_pool(&s, 200);
    s.pool.authorize_drawer(&s.factory, &s.client.address, &false);
    s.env.ledger().set_timestamp(START + GRACE);

    let result = s.client.try_claim_from_pool(&id(&s), &s.relayer);
    assert_eq!(result.err(), Some(Ok(ContractError::Unauthorized)));

    let info = s.client.get_subscription_info(&id(&s));
    assert_eq!(info.status, SubscriptionStatus::Active);
    assert_eq!(info.current_period, 1);
    assert_eq!(s.client.get_payment_info(&id(&s), &1), None);
    assert!(s.client.can_claim_from_pool(&id(&s)));

    // Restoring the role lets the same claim go through.
    s.pool.authorize_drawer(&s.factory, &s.client.address, &true);
    let outcome = s.client.claim_from_pool(&id(&s), &s.relayer);
    assert_eq!(outcome, ClaimOutcome::Covered);
}
