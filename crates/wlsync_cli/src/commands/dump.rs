//! State dump and legacy name migration.

use crate::context::Context;
use std::path::Path;
use std::time::Duration;
use wlsync_engine::migrate_legacy_names;

/// Writes the human-readable dump to `output`, or stdout.
pub async fn run(ctx: &Context, output: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let service = ctx.service(Duration::ZERO);
    let dump = service.dump().await?;
    service.scheduler().shutdown();

    let json = serde_json::to_string_pretty(&dump)?;
    match output {
        Some(path) => {
            std::fs::write(path, json)?;
            println!(
                "✓ Dumped {} user(s) and {} removed account(s) to {}",
                dump.users.len(),
                dump.removed.len(),
                path.display()
            );
        }
        None => println!("{json}"),
    }
    Ok(())
}

/// Replaces legacy display names in the store by UUIDs.
pub async fn migrate(ctx: &Context) -> Result<(), Box<dyn std::error::Error>> {
    if migrate_legacy_names(&ctx.store, ctx.names.as_ref()).await? {
        println!("✓ Migrated legacy names");
    } else {
        println!("No legacy names to migrate");
    }
    Ok(())
}
