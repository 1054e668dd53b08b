use std::{
    fs, io,
    path::{Path, PathBuf},
};

use salvage::{
    config::RepairConfig,
    material::{first_material_path, load_material},
    repair::{
        factory::Factory,
        retriever::{Retriever, Strategy},
    },
    sql::{RusqliteHandle, SqlError},
    storage::{
        file_layer::{FileLayer, LocalFileLayer},
        pager::{Pager, PagerConfig},
    },
    types::{
        cell::Cell,
        error::{RepairError, Severity},
        page::Page,
    },
    utils::mock::TempDatabase,
};

const ROWS: i64 = 60;

fn populated() -> Result<TempDatabase, Box<dyn std::error::Error>> {
    let db = TempDatabase::with_name("app.db")?;
    db.execute_batch(
        "CREATE TABLE t(id INTEGER PRIMARY KEY, body TEXT);
         CREATE INDEX t_body ON t(body);",
    )?;
    let connection = db.connection()?;
    for id in 1..=ROWS {
        connection.execute(
            "INSERT INTO t(id, body) VALUES(?1, ?2)",
            rusqlite::params![id, format!("{:03}", id).repeat(200)],
        )?;
    }
    Ok(db)
}

fn row_ids(db: &TempDatabase, page_no: u32) -> Result<Vec<i64>, Box<dyn std::error::Error>> {
    let mut pager = Pager::open(db.path(), PagerConfig::default())?;
    let page = Page::decode(&mut pager, page_no)?;
    let mut ids = Vec::new();
    for &offset in page.cell_offsets() {
        ids.push(Cell::decode(&mut pager, &page, offset)?.row_id());
    }
    Ok(ids)
}

fn open_handle(path: &Path) -> Result<RusqliteHandle, SqlError> {
    RusqliteHandle::open(path)
}

#[test]
fn test_repeated_repairs_merge_snapshots() -> Result<(), Box<dyn std::error::Error>> {
    let db = populated()?;
    let layer = LocalFileLayer;
    let factory = Factory::new(db.path());

    // First run: no material yet, so the live file is crawled from its schema.
    let leaves = db.leaf_pages("t")?;
    let lost_first = row_ids(&db, leaves[1])?;
    db.zero_page(leaves[1])?;

    let report = Retriever::new(db.path(), RepairConfig::default(), &layer).work(open_handle)?;
    assert!(report.replaced);
    assert_eq!(report.sources.len(), 1);
    assert_eq!(report.sources[0].strategy, Strategy::FullCrawler);
    assert!(report.score > 0.0 && report.score < 1.0);
    assert_eq!(report.severity, Severity::None);
    assert_eq!(db.count_rows("t")?, ROWS - lost_first.len() as i64);
    assert!(first_material_path(db.path()).exists());
    assert!(load_material(db.path())?.is_some());
    assert!(!factory.restore_directory().exists());

    let workshops = factory.workshop_directories()?;
    assert_eq!(workshops.len(), 1);
    assert!(factory.workshop_database(&workshops[0]).exists());

    // Second run: the repaired file now has a material, and the first
    // snapshot still holds the rows of the leaf damaged now.
    let leaves = db.leaf_pages("t")?;
    let last = leaves[leaves.len() - 1];
    let lost_second = row_ids(&db, last)?;
    assert!(lost_second.iter().all(|id| !lost_first.contains(id)));
    db.zero_page(last)?;

    let report = Retriever::new(db.path(), RepairConfig::default(), &layer).work(open_handle)?;
    assert!(report.replaced);
    assert_eq!(report.sources.len(), 2);
    assert_eq!(report.sources[0].strategy, Strategy::Mechanic);
    assert_eq!(report.sources[0].corruptions.len(), 1);
    assert_eq!(report.sources[1].strategy, Strategy::FullCrawler);
    assert!((report.sources.iter().map(|source| source.weight).sum::<f64>() - 1.0).abs() < 1e-9);
    assert_eq!(db.count_rows("t")?, ROWS - lost_first.len() as i64);
    let connection = db.connection()?;
    for id in &lost_second {
        let found: i64 =
            connection.query_row("SELECT count(*) FROM t WHERE id = ?1", [id], |row| row.get(0))?;
        assert_eq!(found, 1, "row {} was not merged back", id);
    }
    drop(connection);

    // The snapshot from the first run was merged and is gone.
    let remaining = factory.workshop_directories()?;
    assert_eq!(remaining.len(), 1);
    assert!(!remaining.contains(&workshops[0]));
    Ok(())
}

#[test]
fn test_unreadable_database_recovers_nothing() -> Result<(), Box<dyn std::error::Error>> {
    let directory = tempfile::tempdir()?;
    let database = directory.path().join("garbage.db");
    let bytes: Vec<u8> = (0..8192u32).map(|i| (i * 7 % 256) as u8).collect();
    fs::write(&database, &bytes)?;

    let layer = LocalFileLayer;
    let result = Retriever::new(&database, RepairConfig::default(), &layer).work(open_handle);
    assert!(matches!(result, Err(RepairError::NothingRecovered)));
    assert_eq!(fs::read(&database)?, bytes);
    Ok(())
}

#[test]
fn test_cancelled_progress_leaves_the_original() -> Result<(), Box<dyn std::error::Error>> {
    let db = populated()?;
    let original = fs::read(db.path())?;
    let layer = LocalFileLayer;

    let mut calls = 0;
    let result = Retriever::new(db.path(), RepairConfig::default(), &layer)
        .with_progress(Box::new(|_: f64, _: f64| {
            calls += 1;
            calls < 3
        }))
        .work(open_handle);
    assert!(matches!(result, Err(RepairError::Interrupted)));
    assert_eq!(fs::read(db.path())?, original);
    assert!(Factory::new(db.path()).workshop_directories()?.is_empty());
    Ok(())
}

/// Refuses to move anything out of `restore`, as when another database
/// shows up at the destination while the repair runs.
struct RacingLayer {
    restore: PathBuf,
}

impl FileLayer for RacingLayer {
    fn file_exists(&self, path: &Path) -> io::Result<bool> {
        LocalFileLayer.file_exists(path)
    }

    fn file_size(&self, path: &Path) -> io::Result<u64> {
        LocalFileLayer.file_size(path)
    }

    fn move_items(&self, items: &[(PathBuf, PathBuf)]) -> io::Result<()> {
        if items.iter().any(|(source, _)| source.starts_with(&self.restore)) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "database appeared at the destination",
            ));
        }
        LocalFileLayer.move_items(items)
    }

    fn remove_items(&self, paths: &[PathBuf]) -> io::Result<()> {
        LocalFileLayer.remove_items(paths)
    }

    fn create_directory(&self, path: &Path) -> io::Result<()> {
        LocalFileLayer.create_directory(path)
    }
}

#[test]
fn test_destination_race_discards_the_recovered_copy() -> Result<(), Box<dyn std::error::Error>> {
    let db = populated()?;
    let factory = Factory::new(db.path());
    let layer = RacingLayer {
        restore: factory.restore_directory(),
    };

    let report = Retriever::new(db.path(), RepairConfig::default(), &layer).work(open_handle)?;
    assert!(!report.replaced);
    assert!(report.score > 0.0);
    assert!(!factory.restore_directory().exists());

    // The original was archived before the swap was attempted.
    let deposited = report.deposited.map(PathBuf::from).ok_or("nothing deposited")?;
    assert!(factory.workshop_database(&deposited).exists());
    assert!(!db.path().exists());
    Ok(())
}

#[test]
fn test_failing_snapshot_is_skipped() -> Result<(), Box<dyn std::error::Error>> {
    let db = TempDatabase::with_name("app.db")?;
    db.execute_batch(
        "CREATE TABLE t(id INTEGER PRIMARY KEY, body TEXT);
         CREATE INDEX clash ON t(body);
         INSERT INTO t(body) VALUES('kept');",
    )?;
    let factory = Factory::new(db.path());

    // An older snapshot whose table name is taken by an index of the live
    // file, so replaying its CREATE TABLE fails in the engine.
    let old_workshop = factory.directory().join("20200101000000000000");
    fs::create_dir_all(&old_workshop)?;
    rusqlite::Connection::open(factory.workshop_database(&old_workshop))?.execute_batch(
        "CREATE TABLE clash(x);
         INSERT INTO clash VALUES(1);",
    )?;

    let layer = LocalFileLayer;
    let report = Retriever::new(db.path(), RepairConfig::default(), &layer).work(open_handle)?;
    assert!(report.replaced);
    assert_eq!(report.sources.len(), 2);
    assert_eq!(report.sources[0].strategy, Strategy::FullCrawler);
    assert_eq!(report.sources[1].strategy, Strategy::Unreadable);
    assert_eq!(report.severity, Severity::Normal);
    assert!(report.score > 0.0 && report.score < 1.0);
    assert_eq!(db.count_rows("t")?, 1);

    // Not merged, so the snapshot is kept next to the new one.
    let workshops = factory.workshop_directories()?;
    assert_eq!(workshops.len(), 2);
    assert!(workshops.contains(&old_workshop));
    Ok(())
}
