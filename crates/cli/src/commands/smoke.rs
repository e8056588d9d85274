use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDate;
use serde::Serialize;

use crate::commands::CommandResult;
use probatio_core::audit::InMemoryAuditSink;
use probatio_core::config::{AppConfig, LoadOptions};
use probatio_core::domain::member::{MemberId, RoleId};
use probatio_core::domain::request::{CompletionOutcome, RequestStatus};
use probatio_core::domain::step::TargetTier;
use probatio_core::engine::{NewRequest, PromotionEngine};
use probatio_core::notify::TracingNotificationSink;
use probatio_db::{
    migrations, open_pool, open_with, DemoSeedDataset, SqlMemberDirectory, SqlRequestStore,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum SmokeStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct SmokeCheck {
    name: &'static str,
    status: SmokeStatus,
    elapsed_ms: u64,
    message: String,
}

#[derive(Debug, Serialize)]
struct SmokeReport {
    command: &'static str,
    status: SmokeStatus,
    summary: String,
    total_elapsed_ms: u64,
    checks: Vec<SmokeCheck>,
}

pub fn run() -> CommandResult {
    let started = Instant::now();
    let mut checks = Vec::new();

    let config = match timed_check(|| AppConfig::load(LoadOptions::default())) {
        Ok((elapsed_ms, config)) => {
            checks.push(SmokeCheck {
                name: "config_validation",
                status: SmokeStatus::Pass,
                elapsed_ms,
                message: "configuration loaded and validated".to_string(),
            });
            config
        }
        Err((elapsed_ms, error)) => {
            checks.push(SmokeCheck {
                name: "config_validation",
                status: SmokeStatus::Fail,
                elapsed_ms,
                message: error.to_string(),
            });
            checks.push(skipped("db_connectivity"));
            checks.push(skipped("migration_visibility"));
            checks.push(skipped("chain_walk"));
            return finalize_report(checks, started.elapsed().as_millis() as u64);
        }
    };
    crate::init_logging(&config.logging);

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            checks.push(SmokeCheck {
                name: "db_connectivity",
                status: SmokeStatus::Fail,
                elapsed_ms: 0,
                message: format!("failed to initialize async runtime: {error}"),
            });
            checks.push(skipped("migration_visibility"));
            checks.push(skipped("chain_walk"));
            return finalize_report(checks, started.elapsed().as_millis() as u64);
        }
    };

    let db_started = Instant::now();
    let db_result = runtime.block_on(open_pool(&config.database));

    let pool = match db_result {
        Ok(pool) => {
            checks.push(SmokeCheck {
                name: "db_connectivity",
                status: SmokeStatus::Pass,
                elapsed_ms: db_started.elapsed().as_millis() as u64,
                message: format!("connected using `{}`", config.database.url),
            });
            pool
        }
        Err(error) => {
            checks.push(SmokeCheck {
                name: "db_connectivity",
                status: SmokeStatus::Fail,
                elapsed_ms: db_started.elapsed().as_millis() as u64,
                message: format!("failed to connect: {error}"),
            });
            checks.push(skipped("migration_visibility"));
            checks.push(skipped("chain_walk"));
            return finalize_report(checks, started.elapsed().as_millis() as u64);
        }
    };

    let migration_started = Instant::now();
    let migration_result = runtime.block_on(async { migrations::run_pending(&pool).await });
    runtime.block_on(async {
        pool.close().await;
    });

    match migration_result {
        Ok(()) => checks.push(SmokeCheck {
            name: "migration_visibility",
            status: SmokeStatus::Pass,
            elapsed_ms: migration_started.elapsed().as_millis() as u64,
            message: "migrations are visible and executable".to_string(),
        }),
        Err(error) => checks.push(SmokeCheck {
            name: "migration_visibility",
            status: SmokeStatus::Fail,
            elapsed_ms: migration_started.elapsed().as_millis() as u64,
            message: format!("migration execution failed: {error}"),
        }),
    }

    // The chain walk always runs against a disposable in-memory database so a
    // smoke run never writes workflow state into the configured one.
    let walk_started = Instant::now();
    let walk_result = runtime.block_on(chain_walk());
    match walk_result {
        Ok(message) => checks.push(SmokeCheck {
            name: "chain_walk",
            status: SmokeStatus::Pass,
            elapsed_ms: walk_started.elapsed().as_millis() as u64,
            message,
        }),
        Err(error) => checks.push(SmokeCheck {
            name: "chain_walk",
            status: SmokeStatus::Fail,
            elapsed_ms: walk_started.elapsed().as_millis() as u64,
            message: error,
        }),
    }

    finalize_report(checks, started.elapsed().as_millis() as u64)
}

/// Seeds a throwaway database and drives one request through the full
/// three-level chain to completion.
async fn chain_walk() -> Result<String, String> {
    let pool = open_with("sqlite::memory:", 1, 30)
        .await
        .map_err(|error| format!("scratch database unavailable: {error}"))?;
    migrations::run_pending(&pool)
        .await
        .map_err(|error| format!("scratch migration failed: {error}"))?;
    DemoSeedDataset::load(&pool)
        .await
        .map_err(|error| format!("scratch seed failed: {error}"))?;

    let store = SqlRequestStore::new(pool.clone());
    let engine = PromotionEngine::new(
        store.clone(),
        SqlMemberDirectory::new(pool.clone()),
        TracingNotificationSink,
        Arc::new(InMemoryAuditSink::default()),
    );

    let subject = MemberId(DemoSeedDataset::FREE_SUBJECT_ID.to_string());
    let record = engine
        .submit_request(NewRequest {
            subject_id: subject.clone(),
            target_role_id: RoleId("role-smoke-check".to_string()),
            target_tier: TargetTier::MidInternship,
            start_date: NaiveDate::from_ymd_opt(2027, 1, 1)
                .ok_or_else(|| "invalid smoke start date".to_string())?,
            duration_months: 6,
            requested_by: MemberId("m-sec".to_string()),
        })
        .await
        .map_err(|error| format!("submission failed: {error}"))?;

    let mut last = record.clone();
    for step in &record.steps {
        let approver = step
            .approver_actor_id
            .clone()
            .ok_or_else(|| format!("chain level {} resolved vacant in the seed", step.level))?;
        last = engine
            .approve(&step.id, &approver)
            .await
            .map_err(|error| format!("approval at level {} failed: {error}", step.level))?;
    }
    if last.request.status != RequestStatus::Active {
        return Err(format!("chain complete but request is {:?}", last.request.status));
    }

    let completed = engine
        .complete(
            &record.request.id,
            &MemberId("m-rd-north".to_string()),
            CompletionOutcome::CompletedWithCredit,
            None,
        )
        .await
        .map_err(|error| format!("completion failed: {error}"))?;
    if !matches!(completed.request.status, RequestStatus::Completed(_)) {
        return Err(format!("completion left request {:?}", completed.request.status));
    }

    let residual = store
        .active_training_role(&subject)
        .await
        .map_err(|error| format!("subject check failed: {error}"))?;
    if residual.is_some() {
        return Err("subject still carries a training-role reference after completion".to_string());
    }

    pool.close().await;
    Ok(format!(
        "request {} walked submit -> 3 approvals -> active -> completed",
        record.request.id
    ))
}

fn timed_check<T, E>(check: impl FnOnce() -> Result<T, E>) -> Result<(u64, T), (u64, E)> {
    let started = Instant::now();
    match check() {
        Ok(value) => Ok((started.elapsed().as_millis() as u64, value)),
        Err(error) => Err((started.elapsed().as_millis() as u64, error)),
    }
}

fn skipped(name: &'static str) -> SmokeCheck {
    SmokeCheck {
        name,
        status: SmokeStatus::Skipped,
        elapsed_ms: 0,
        message: "skipped due previous failure".to_string(),
    }
}

fn finalize_report(checks: Vec<SmokeCheck>, total_elapsed_ms: u64) -> CommandResult {
    let passed = checks.iter().filter(|check| check.status == SmokeStatus::Pass).count();
    let total = checks.len();
    let failed = checks.iter().any(|check| check.status == SmokeStatus::Fail);

    let report = SmokeReport {
        command: "smoke",
        status: if failed { SmokeStatus::Fail } else { SmokeStatus::Pass },
        summary: format!("smoke: {passed}/{total} checks passed in {total_elapsed_ms}ms"),
        total_elapsed_ms,
        checks,
    };

    let human = report.summary.clone();
    let machine = serde_json::to_string(&report).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"smoke\",\"status\":\"fail\",\"summary\":\"serialization failed\",\"error\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    });

    CommandResult { exit_code: if failed { 6 } else { 0 }, output: format!("{human}\n{machine}") }
}
