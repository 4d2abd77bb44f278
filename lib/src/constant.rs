// Typed-data domain shared by every PayGuard signature.
pub const DOMAIN_NAME: &str = "PayGuard";
pub const DOMAIN_VERSION: &str = "1";

pub const AGREEMENT_TYPE_NAME: &str = "PaymentAgreement";
pub const CANCEL_TYPE_NAME: &str = "CancelSubscription";
pub const AGENT_ACTION_TYPE_NAME: &str = "AgentAction";

// ERC-1271 style results of a signature capability check.
pub const SIGNATURE_MAGIC_VALID: u32 = 0x1626_ba7e;
pub const SIGNATURE_MAGIC_INVALID: u32 = 0xffff_ffff;

pub const BPS_DENOMINATOR: u32 = 10_000;
pub const DEFAULT_MAX_UTILIZATION_BPS: u32 = 8_000;

pub const DIRECT_PAYMENT_POINTS: u64 = 10;
pub const POOL_PAYMENT_POINTS: u64 = 5;

pub const RATING_EXCELLENT_THRESHOLD: u64 = 500;
pub const RATING_GOOD_THRESHOLD: u64 = 250;
pub const RATING_FAIR_THRESHOLD: u64 = 100;

pub const MAX_STRING_LENGTH: u32 = 256;
pub const MAX_BATCH_SIZE: u32 = 64;

// Instance storage keys
pub const ADMIN_KEY: &str = "admin";
pub const FACTORY_KEY: &str = "factory";
pub const REENTRANCY_KEY: &str = "reentrancy";
