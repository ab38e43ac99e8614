use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::Error;

/// One hour, as in the original widget.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_CLAIM_ATTEMPTS: u32 = 5;

/// How the next coupon is picked.
///
/// `RoundRobin` walks the catalog in order and is strictly fair, but every
/// allocation goes through one shared cursor. `AnyUnclaimed` takes whatever
/// pool record is still free and recycles the whole pool once it runs dry;
/// it copes better with many writers but can hand the same code out twice in
/// a row across a recycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationPolicy {
    RoundRobin,
    AnyUnclaimed,
}

impl FromStr for AllocationPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "round-robin" | "round_robin" | "roundrobin" => Ok(AllocationPolicy::RoundRobin),
            "any-unclaimed" | "any_unclaimed" | "pool" => Ok(AllocationPolicy::AnyUnclaimed),
            other => Err(Error::Config(format!("unknown allocation policy '{other}'"))),
        }
    }
}

impl fmt::Display for AllocationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocationPolicy::RoundRobin => f.write_str("round-robin"),
            AllocationPolicy::AnyUnclaimed => f.write_str("any-unclaimed"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CouponConfig {
    pub cooldown: Duration,

    /// Upper bound for every individual store call made while serving a request.
    pub request_timeout: Duration,

    /// Rounds of list-then-conditionally-mark before the pool allocator gives up.
    pub max_claim_attempts: u32,
}

impl Default for CouponConfig {
    fn default() -> Self {
        Self {
            cooldown: DEFAULT_COOLDOWN,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_claim_attempts: DEFAULT_MAX_CLAIM_ATTEMPTS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_parsing() {
        assert_eq!("round-robin".parse::<AllocationPolicy>().unwrap(), AllocationPolicy::RoundRobin);
        assert_eq!("Any_Unclaimed".parse::<AllocationPolicy>().unwrap(), AllocationPolicy::AnyUnclaimed);
        assert!("random".parse::<AllocationPolicy>().is_err());
        assert_eq!(AllocationPolicy::AnyUnclaimed.to_string(), "any-unclaimed");
    }
}
