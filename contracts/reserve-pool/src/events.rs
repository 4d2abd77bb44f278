//! Event payloads for the reserve pool. Topics are `("pool", <kind>)`.

use soroban_sdk::{contracttype, symbol_short, Address, BytesN, Env};

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StakeEvent {
    pub underwriter: Address,
    pub token: Address,
    /// Underwriter's stake after the change.
    pub staked: i128,
    pub utilization_cap: i128,
    pub total_staked: i128,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CreditLineEvent {
    pub user: Address,
    pub token: Address,
    pub credit_line: i128,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DrawEvent {
    pub agreement_id: BytesN<32>,
    pub user: Address,
    pub token: Address,
    pub amount: i128,
    pub user_debt: i128,
    pub total_utilized: i128,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RepaymentEvent {
    pub payer: Address,
    pub user: Address,
    pub token: Address,
    pub amount: i128,
    pub user_debt: i128,
}

pub fn publish_stake_added(env: &Env, event: StakeEvent) {
    env.events()
        .publish((symbol_short!("pool"), symbol_short!("stake")), event);
}

pub fn publish_stake_removed(env: &Env, event: StakeEvent) {
    env.events()
        .publish((symbol_short!("pool"), symbol_short!("unstake")), event);
}

pub fn publish_credit_line(env: &Env, event: CreditLineEvent) {
    env.events()
        .publish((symbol_short!("pool"), symbol_short!("line")), event);
}

pub fn publish_draw(env: &Env, event: DrawEvent) {
    env.events()
        .publish((symbol_short!("pool"), symbol_short!("draw")), event);
}

pub fn publish_repayment(env: &Env, event: RepaymentEvent) {
    env.events()
        .publish((symbol_short!("pool"), symbol_short!("repay")), event);
}
