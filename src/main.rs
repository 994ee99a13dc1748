use anyhow::{Context, Result};
use rusqlite::Connection;
use std::env;
use std::path::{Path, PathBuf};

use recetario::{
    count_recetas, create_user, date_bounds, distinct_sucursales, insert_recetas, load_csv,
    setup_database, RecetaFilter,
};

fn db_path() -> PathBuf {
    env::var("RECETARIO_DB")
        .unwrap_or_else(|_| "recetas.db".to_string())
        .into()
}

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    match args.get(1).map(String::as_str) {
        Some("init") => run_init(),
        Some("import") => {
            let csv = args
                .get(2)
                .context("usage: recetario import <recetas.csv>")?;
            run_import(Path::new(csv))
        }
        Some("adduser") => {
            let username = args.get(2).context("usage: recetario adduser <user> <password>")?;
            let password = args.get(3).context("usage: recetario adduser <user> <password>")?;
            run_adduser(username, password)
        }
        Some("stats") => run_stats(),
        _ => {
            println!("recetario - pharmacy prescription records");
            println!();
            println!("Usage:");
            println!("  recetario init                      create the database schema");
            println!("  recetario import <recetas.csv>      import scanned records");
            println!("  recetario adduser <user> <password> create a login");
            println!("  recetario stats                     show record counts");
            println!();
            println!("Database path comes from RECETARIO_DB (default: recetas.db)");
            Ok(())
        }
    }
}

fn run_init() -> Result<()> {
    let path = db_path();
    let conn = Connection::open(&path)?;
    setup_database(&conn)?;
    println!("✓ Database initialized with WAL mode: {:?}", path);

    Ok(())
}

fn run_import(csv_path: &Path) -> Result<()> {
    println!("📂 Loading CSV...");
    let recetas = load_csv(csv_path)?;
    println!("✓ Loaded {} recetas from CSV", recetas.len());

    let conn = Connection::open(db_path())?;
    setup_database(&conn)?;

    println!("💾 Inserting recetas...");
    let inserted = insert_recetas(&conn, &recetas)?;
    println!("✓ Inserted: {} recetas", inserted);

    let count = count_recetas(&conn, &RecetaFilter::default())?;
    println!("✓ Database contains {} recetas", count);

    Ok(())
}

fn run_adduser(username: &str, password: &str) -> Result<()> {
    let conn = Connection::open(db_path())?;
    setup_database(&conn)?;

    create_user(&conn, username, password).context("Failed to create user")?;
    println!("✓ User created: {}", username);

    Ok(())
}

fn run_stats() -> Result<()> {
    let conn = Connection::open(db_path())?;
    setup_database(&conn)?;

    let count = count_recetas(&conn, &RecetaFilter::default())?;
    println!("Recetas: {}", count);

    let branches = distinct_sucursales(&conn)?;
    println!("Sucursales: {:?}", branches);

    match date_bounds(&conn)? {
        Some((min, max)) => println!("Date range: {} - {}", min, max),
        None => println!("Date range: (empty)"),
    }

    Ok(())
}
