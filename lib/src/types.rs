use soroban_sdk::{contracttype, Address, BytesN, String};

/// Signed terms binding a user to pay a provider on a schedule.
/// Immutable once accepted by the factory.
#[derive(Clone, Debug, Eq, PartialEq)]
#[contracttype]
pub struct PaymentAgreement {
    pub agreement_id: BytesN<32>,
    pub user: Address,
    pub provider: Address,
    pub token: Address,
    pub amount: i128,
    /// Seconds between charges.
    pub period: u64,
    /// First due timestamp.
    pub start_date: u64,
    /// Seconds of tolerance after a due date before the pool may cover it.
    pub grace_period: u64,
    /// Ceiling the reserve pool may advance over the life of the agreement.
    pub max_cover: i128,
    pub nonce: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[contracttype]
#[repr(u32)]
pub enum SubscriptionStatus {
    Active = 0,
    Paused = 1,
    Cancelled = 2,
    Defaulted = 3,
}

impl SubscriptionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SubscriptionStatus::Cancelled | SubscriptionStatus::Defaulted)
    }
}

/// Contracts an agreement talks to, snapshotted when it is opened.
#[derive(Clone, Debug, Eq, PartialEq)]
#[contracttype]
pub struct SubscriptionLinks {
    pub reserve_pool: Address,
    pub credit_ledger: Address,
    pub user_agent: Address,
}

/// One history entry per period.
#[derive(Clone, Debug, Eq, PartialEq)]
#[contracttype]
pub struct PaymentRecord {
    pub period: u32,
    pub due_date: u64,
    /// Zero while the period is unpaid.
    pub paid_date: u64,
    pub amount: i128,
    pub from_pool: bool,
    /// None when the reserve pool paid.
    pub payer: Option<Address>,
    /// Zero when no credit record was minted.
    pub credit_record_id: u64,
    pub dispute_reason: Option<String>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[contracttype]
pub struct SubscriptionInfo {
    pub terms: PaymentAgreement,
    pub status: SubscriptionStatus,
    pub next_payment_due: u64,
    pub current_period: u32,
    pub total_paid: i128,
    pub total_from_pool: i128,
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[contracttype]
pub struct DebtStatus {
    pub pool_debt: i128,
    pub next_due: u64,
    pub overdue: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[contracttype]
#[repr(u32)]
pub enum ClaimOutcome {
    Covered = 0,
    Defaulted = 1,
}

/// A signature together with the account that claims to have produced it.
/// The signature is checked against the key the account registered in the
/// signer directory.
#[derive(Clone, Debug, Eq, PartialEq)]
#[contracttype]
pub struct SignerProof {
    pub signer: Address,
    pub signature: BytesN<64>,
}

/// Soulbound credit record minted on every successful payment.
#[derive(Clone, Debug, Eq, PartialEq)]
#[contracttype]
pub struct CreditRecord {
    pub id: u64,
    pub user: Address,
    /// Agreement the payment belongs to.
    pub subscription: BytesN<32>,
    /// Contract that minted the record.
    pub issuer: Address,
    pub amount: i128,
    pub timestamp: u64,
    pub score: u64,
    pub metadata: String,
    pub soulbound: bool,
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[contracttype]
pub struct CreditScore {
    pub score: u64,
    pub rating: String,
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[contracttype]
pub struct Stake {
    pub amount: i128,
    pub utilization_cap: i128,
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[contracttype]
pub struct PoolStats {
    pub total_staked: i128,
    pub total_utilized: i128,
    /// Basis points of staked capital currently advanced.
    pub utilization_rate: u32,
    pub max_utilization_rate: u32,
    pub available_capacity: i128,
}
