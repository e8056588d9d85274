use crate::commands::{self, CommandResult};
use probatio_core::config::{AppConfig, LoadOptions};
use probatio_db::{migrations, open_pool, DemoSeedDataset, VerificationResult};

pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "seed",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };
    crate::init_logging(&config.logging);

    let outcome = commands::block_on("seed", async {
        let pool = open_pool(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;

        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        let seeded = DemoSeedDataset::load(&pool)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;
        let verification = DemoSeedDataset::verify(&pool)
            .await
            .map_err(|error| ("seed_verification", error.to_string(), 6u8))?;
        pool.close().await;

        if let Some(message) = describe_failed_checks(&verification) {
            return Err(("seed_verification", message, 6u8));
        }
        Ok(format!(
            "demo dataset loaded: {} members, request {} in flight",
            seeded.members_seeded, seeded.demo_request_id
        ))
    });

    match outcome {
        Ok(message) => CommandResult::success("seed", message),
        Err(failure) => failure,
    }
}

fn describe_failed_checks(verification: &VerificationResult) -> Option<String> {
    if verification.all_present {
        return None;
    }

    let failed: Vec<&str> = verification
        .checks
        .iter()
        .filter_map(|(check, passed)| (!passed).then_some(*check))
        .collect();

    Some(if failed.is_empty() {
        "some seed data failed to load".to_string()
    } else {
        format!("seed verification failed for checks: {}", failed.join(", "))
    })
}
