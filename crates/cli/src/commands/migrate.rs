use crate::commands::{self, CommandFailure, CommandResult};
use probatio_core::config::{AppConfig, LoadOptions};
use probatio_db::{migrations, open_pool};

pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "migrate",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };
    crate::init_logging(&config.logging);

    let outcome = commands::block_on("migrate", async {
        let pool = open_pool(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;

        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        let provisioned = migrations::schema_is_provisioned(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;
        pool.close().await;

        if !provisioned {
            let failure: CommandFailure = (
                "migration",
                "migrations ran but the workflow schema is still missing".to_string(),
                5u8,
            );
            return Err(failure);
        }
        Ok("applied pending migrations; workflow schema is current".to_string())
    });

    match outcome {
        Ok(message) => CommandResult::success("migrate", message),
        Err(failure) => failure,
    }
}
