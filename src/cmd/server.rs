//! Board server and database commands: `taskflow serve`, `init`, `seed`.

use std::path::Path;

use anyhow::Result;

use taskflow::board::db::BoardDb;
use taskflow::board::seed::{self, DEMO_PASSWORD};
use taskflow::board::server::start_server;
use taskflow::config::Settings;

pub async fn cmd_serve(settings: Settings) -> Result<()> {
    start_server(settings.server).await
}

pub fn cmd_init(db_path: &Path) -> Result<()> {
    BoardDb::new(db_path)?;
    println!("Database initialized at {}", db_path.display());
    Ok(())
}

pub fn cmd_seed(db_path: &Path) -> Result<()> {
    let db = BoardDb::new(db_path)?;
    let summary = seed::seed_demo(&db)?;

    println!("Seeded {}", db_path.display());
    println!("  users created:    {}", summary.users_created);
    println!("  project id:       {}", summary.project_id);
    println!("  tasks created:    {}", summary.tasks_created);
    println!("  comments created: {}", summary.comments_created);
    println!();
    println!("Sign in as demo@taskflow.com with password \"{}\"", DEMO_PASSWORD);
    Ok(())
}
