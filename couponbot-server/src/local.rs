//! Single-user mode over a JSON state file.

use std::path::PathBuf;
use std::sync::Arc;

use clap::ValueEnum;
use tracing::{info, warn};

use couponbot_core::allocation::AllocationEngine;
use couponbot_core::catalog::CouponCatalog;
use couponbot_core::config::CouponConfig;
use couponbot_core::identity::IdentityProvider;
use couponbot_core::ledger::{LocalClaimLedger, CLAIM_SLOT_KEY};
use couponbot_core::repositories::{FileStore, KeyValueCursor, KeyValueStore};
use couponbot_core::services::{CouponGrant, CouponService, IpResolver};
use couponbot_core::{DefaultHttpClient, Error};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LocalAction {
    /// Claim a coupon, or show the one already held.
    Claim,
    /// Show the active coupon without claiming.
    Show,
    /// Forget this machine's identity and claim.
    Reset,
}

pub struct LocalOptions {
    pub state_file: PathBuf,
    pub catalog: Arc<CouponCatalog>,
    pub config: CouponConfig,
    /// `None` skips the address lookup.
    pub ip_lookup_url: Option<String>,
}

pub fn default_state_file() -> Result<PathBuf, Error> {
    dirs::data_dir()
        .map(|dir| dir.join("couponbot").join("state.json"))
        .ok_or_else(|| Error::Config("no data directory on this platform; pass --state-file".into()))
}

pub async fn run_local(action: LocalAction, opts: LocalOptions) -> Result<(), Error> {
    info!("Local state file: {}", opts.state_file.display());
    let store = Arc::new(FileStore::new(opts.state_file.clone()));
    let identity = IdentityProvider::new(store.clone());

    match action {
        LocalAction::Claim => {
            let token = identity.get_or_create_identity().await?;
            let ip = match &opts.ip_lookup_url {
                Some(url) => IpResolver::with_url(DefaultHttpClient::new()?, url).resolve().await,
                None => None,
            };

            let service = local_service(store, &opts);
            match service.request_coupon(&token, ip).await {
                Ok(grant) => print_grant(&grant),
                Err(e) => {
                    warn!("Claim failed: {}", e);
                    println!("Could not get a coupon: {}", e);
                    if e.is_retryable() {
                        println!("Please try again in a moment.");
                    }
                }
            }
        }
        LocalAction::Show => {
            let Some(token) = identity.current().await? else {
                println!("No coupon claimed on this machine yet.");
                return Ok(());
            };
            let service = local_service(store, &opts);
            match service.current_claim(&token).await {
                Ok(Some(grant)) => print_grant(&grant),
                Ok(None) => println!("No active coupon. You can claim a new one."),
                Err(e) => println!("Could not read coupon state: {}", e),
            }
        }
        LocalAction::Reset => {
            identity.reset_identity().await?;
            store.delete_value(CLAIM_SLOT_KEY).await?;
            println!("Identity and claim cleared.");
        }
    }
    Ok(())
}

fn local_service(store: Arc<FileStore>, opts: &LocalOptions) -> CouponService {
    let cursor = Arc::new(KeyValueCursor::new(store.clone()));
    let engine = AllocationEngine::round_robin(opts.catalog.clone(), cursor);
    let ledger = LocalClaimLedger::new(store);
    CouponService::new(Arc::new(engine), Arc::new(ledger), opts.config.clone())
}

fn print_grant(grant: &CouponGrant) {
    if grant.is_new() {
        println!("Your new coupon:");
    } else {
        println!("You already have an active coupon:");
    }
    println!("  {}  {}", grant.coupon.code, grant.coupon.discount_label);
    println!("  {}", grant.coupon.description);
    println!("  Next coupon available in {}", grant.formatted_remaining());
}
