use soroban_sdk::contracterror;

// ============================================================================
// Contract Error Enum
// ============================================================================
#[contracterror]
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord)]
#[repr(u32)]
pub enum ContractError {
    AlreadyInitialized = 1,
    NotInitialized = 2,
    Unauthorized = 3,
    InvalidAddress = 4,
    AlreadyExists = 5,
    NotFound = 6,

    // Agreement validation
    InvalidUserAddress = 10,
    InvalidProviderAddress = 11,
    InvalidTokenAddress = 12,
    InvalidAmount = 13,
    InvalidPeriod = 14,
    StartDateNotInFuture = 15,
    InvalidAgreementId = 16,
    AgreementExists = 17,
    InvalidProviderSignature = 18,
    InvalidUserSignature = 19,
    InvalidSignature = 20,

    // Subscription state machine
    PaymentNotDue = 30,
    InvalidStatus = 31,
    SubscriptionTerminated = 32,
    PoolClaimNotAllowed = 33,
    NoPaymentForPeriod = 34,
    DisputeAlreadyRaised = 35,

    // Delegated signing
    AgentNotAuthorized = 40,
    InvalidAgentAddress = 41,
    ArrayLengthMismatch = 42,
    InvalidNonce = 43,
    InvalidTarget = 44,

    // Reserve pool capacity
    CreditLineExceeded = 50,
    MaxCoverExceeded = 51,
    UtilizationCapExceeded = 52,
    InsufficientStake = 53,
    InsufficientAvailableStake = 54,
    InvalidRate = 55,
    PoolUnavailable = 56,

    // Credit ledger
    SoulboundTransferDisallowed = 60,

    Reentrancy = 70,
    OverflowError = 71,
    InvalidInput = 72,
}
