//! Subcommand definitions and handlers.

use std::sync::Arc;

use anyhow::Result;
use clap::Subcommand;
use serde::Serialize;

use watchtime_engine::{
    AdUnlockSequencer, BackendSelector, Clock, MigrationOutcome, QuotaEngine, SystemClock,
};
use watchtime_models::{QuotaSnapshot, MILLIS_PER_MINUTE};

pub struct Context {
    pub selector: BackendSelector,
    pub user_id: String,
    pub json: bool,
}

impl Context {
    async fn engine(&self) -> Result<QuotaEngine> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        Ok(self.selector.engine_for(&self.user_id, clock).await?)
    }

    fn print<T: Serialize>(&self, value: &T, text: impl FnOnce() -> String) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            println!("{}", text());
        }
        Ok(())
    }

    fn print_snapshot(&self, snapshot: &QuotaSnapshot) -> Result<()> {
        self.print(snapshot, || snapshot_text(snapshot))
    }
}

#[derive(Subcommand)]
pub enum Command {
    /// Show today's usage, limit and wallet
    Status,

    /// Print a detailed state report
    Report,

    /// Set the parent-configured base daily limit
    SetBase {
        /// Minutes; clamped into the allowed range
        #[arg(allow_negative_numbers = true)]
        minutes: i64,
    },

    /// Credit the wallet for one watched rewarded ad
    Credit,

    /// Move wallet minutes into today's limit
    Apply {
        #[arg(allow_negative_numbers = true)]
        minutes: i64,
    },

    /// Lower today's effective limit, returning minutes to the wallet
    Reduce {
        /// New effective limit in minutes
        #[arg(allow_negative_numbers = true)]
        target: i64,
    },

    /// Record watched time
    Play {
        /// Minutes watched
        #[arg(long, default_value_t = 0)]
        minutes: u32,

        /// Additional seconds watched
        #[arg(long, default_value_t = 0)]
        seconds: u32,
    },

    /// Register one ad toward the unlock sequence
    Unlock,

    /// Abandon the current unlock sequence
    CancelUnlock,

    /// Copy the local record to Firestore and switch this user over
    Migrate,

    /// Apply the midnight reset now
    ForceReset,
}

pub async fn execute(ctx: &Context, command: Command) -> Result<()> {
    match command {
        Command::Status => {
            let engine = ctx.engine().await?;
            let snapshot = engine.try_snapshot().await?;
            ctx.print_snapshot(&snapshot)?;
            if !ctx.json && engine.has_reached_unlock_trigger().await {
                println!("{}", AdUnlockSequencer::new(engine).trigger_message());
            }
        }
        Command::Report => {
            let report = ctx.engine().await?.state_report().await;
            println!("{}", report);
        }
        Command::SetBase { minutes } => {
            let snapshot = ctx.engine().await?.set_base_limit(minutes).await?;
            ctx.print_snapshot(&snapshot)?;
        }
        Command::Credit => {
            let snapshot = ctx.engine().await?.credit_wallet_for_ad_watch().await?;
            ctx.print_snapshot(&snapshot)?;
        }
        Command::Apply { minutes } => {
            let application = ctx.engine().await?.apply_wallet_to_limit(minutes).await?;
            ctx.print(&application, || {
                let mut text = format!(
                    "Applied {} of {} requested minute(s).\n",
                    application.applied_minutes, application.requested_minutes
                );
                if application.is_partial() {
                    text.push_str("Daily maximum reached; the rest stays in the wallet.\n");
                }
                text + &snapshot_text(&application.snapshot)
            })?;
        }
        Command::Reduce { target } => {
            let reduction = ctx.engine().await?.reduce_applied_limit(target).await?;
            ctx.print(&reduction, || {
                format!(
                    "Released {} minute(s), {} returned to the wallet.\n{}",
                    reduction.released_minutes,
                    reduction.returned_to_wallet,
                    snapshot_text(&reduction.snapshot)
                )
            })?;
        }
        Command::Play { minutes, seconds } => {
            let millis = u64::from(minutes) * MILLIS_PER_MINUTE + u64::from(seconds) * 1_000;
            let snapshot = ctx
                .engine()
                .await?
                .record_playback_delta(millis as i64)
                .await?;
            ctx.print_snapshot(&snapshot)?;
        }
        Command::Unlock => {
            let sequencer = AdUnlockSequencer::new(ctx.engine().await?);
            let outcome = sequencer.register_ad_watch().await?;
            ctx.print(&outcome, || {
                let code = outcome
                    .rejection()
                    .map(|r| format!(" [{}]", r.code()))
                    .unwrap_or_default();
                format!("{}{}\n{}", outcome.message(), code, snapshot_text(outcome.snapshot()))
            })?;
        }
        Command::CancelUnlock => {
            let cancelled = AdUnlockSequencer::new(ctx.engine().await?).cancel().await?;
            ctx.print(&cancelled, || {
                if cancelled {
                    "Unlock sequence cancelled.".to_string()
                } else {
                    "No unlock sequence in progress.".to_string()
                }
            })?;
        }
        Command::Migrate => {
            let outcome = ctx.selector.migrate(&ctx.user_id).await?;
            let text = match outcome {
                MigrationOutcome::Migrated => "Local record copied to Firestore.",
                MigrationOutcome::AlreadyPresent => {
                    "Firestore already had a record; kept it and switched over."
                }
                MigrationOutcome::AlreadyMigrated => "Already migrated.",
            };
            ctx.print(&outcome, || text.to_string())?;
        }
        Command::ForceReset => {
            let snapshot = ctx.engine().await?.force_reset().await?;
            ctx.print_snapshot(&snapshot)?;
        }
    }
    Ok(())
}

fn snapshot_text(snapshot: &QuotaSnapshot) -> String {
    format!(
        "{}\nRemaining: {} min | Wallet: {} min | Bonus applied: {} min",
        snapshot.display_string(),
        snapshot.remaining_minutes,
        snapshot.wallet_minutes,
        snapshot.applied_bonus_minutes
    )
}
