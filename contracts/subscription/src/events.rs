//! Subscription lifecycle events. Topics are `("sub", <kind>)`.

use payguard_lib::SubscriptionStatus;
use soroban_sdk::{contracttype, symbol_short, Address, BytesN, Env, String};

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OpenedEvent {
    pub agreement_id: BytesN<32>,
    pub user: Address,
    pub provider: Address,
    pub first_due: u64,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PaymentMadeEvent {
    pub agreement_id: BytesN<32>,
    pub period: u32,
    pub amount: i128,
    /// None when the reserve pool covered the period.
    pub payer: Option<Address>,
    pub from_pool: bool,
    pub credit_record_id: u64,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StatusChangedEvent {
    pub agreement_id: BytesN<32>,
    pub old_status: SubscriptionStatus,
    pub new_status: SubscriptionStatus,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CancelledEvent {
    pub agreement_id: BytesN<32>,
    pub cancelled_by: Address,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DisputeRaisedEvent {
    pub agreement_id: BytesN<32>,
    pub period: u32,
    pub reason: String,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DefaultedEvent {
    pub agreement_id: BytesN<32>,
    pub period: u32,
    pub amount: i128,
}

pub fn publish_opened(env: &Env, event: OpenedEvent) {
    env.events()
        .publish((symbol_short!("sub"), symbol_short!("opened")), event);
}

pub fn publish_payment_made(env: &Env, event: PaymentMadeEvent) {
    env.events()
        .publish((symbol_short!("sub"), symbol_short!("paid")), event);
}

pub fn publish_status_changed(
    env: &Env,
    agreement_id: &BytesN<32>,
    old_status: SubscriptionStatus,
    new_status: SubscriptionStatus,
) {
    let event = StatusChangedEvent {
        agreement_id: agreement_id.clone(),
        old_status,
        new_status,
    };
    env.events()
        .publish((symbol_short!("sub"), symbol_short!("status")), event);
}

pub fn publish_cancelled(env: &Env, event: CancelledEvent) {
    env.events()
        .publish((symbol_short!("sub"), symbol_short!("cancel")), event);
}

pub fn publish_dispute_raised(env: &Env, event: DisputeRaisedEvent) {
    env.events()
        .publish((symbol_short!("sub"), symbol_short!("dispute")), event);
}

pub fn publish_defaulted(env: &Env, event: DefaultedEvent) {
    env.events()
        .publish((symbol_short!("sub"), symbol_short!("default")), event);
}
