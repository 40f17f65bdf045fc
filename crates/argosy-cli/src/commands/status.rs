//! `argosy status` command implementation
//!
//! Read-only view of the catalog index: how many records per status for
//! one region and year. Useful between runs to see what a re-run would
//! pick up.

use crate::db;
use crate::error::Result;
use argosy_pipeline::{CatalogStore, PgCatalogStore, Selector};
use colored::Colorize;

/// Show per-status catalog counts for one region and year
pub async fn run(selector: Selector, database_url: Option<String>) -> Result<()> {
    let pool = db::connect(database_url.as_deref()).await?;
    let store = PgCatalogStore::new(pool);

    let counts = store.status_counts(selector).await?;

    println!(
        "{}",
        format!("Catalog status for {}:", selector).cyan().bold()
    );
    println!("  Pending:   {}", counts.pending);
    println!("  Partial:   {}", counts.partial);
    println!("  Complete:  {}", counts.complete.to_string().green());
    if counts.failed > 0 {
        println!("  Failed:    {}", counts.failed.to_string().red());
    } else {
        println!("  Failed:    {}", counts.failed);
    }
    println!("  Total:     {}", counts.total());

    if counts.total() == 0 {
        println!();
        println!("No catalog records for this selector yet.");
        println!("Run 'argosy run' to fetch the remote inventory.");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use argosy_pipeline::Region;

    #[tokio::test]
    #[ignore] // Requires a PostgreSQL database
    async fn test_status_against_live_database() {
        let selector = Selector::new(Region::Atlantic, 2020).unwrap();
        let url = std::env::var("DATABASE_URL").ok();
        run(selector, url).await.unwrap();
    }
}
