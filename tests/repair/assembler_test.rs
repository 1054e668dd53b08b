use salvage::{
    crawler::{Crawler, CrawlerClient},
    repair::assembler::Assembler,
    sql::{RusqliteHandle, SqlHandle},
    storage::pager::{Pager, PagerConfig},
    types::{cell::Cell, error::CorruptionReport},
    utils::mock::TempDatabase,
};

#[derive(Default)]
struct Cells(Vec<Cell>);

impl CrawlerClient for Cells {
    fn on_cell_crawled(&mut self, cell: &Cell) {
        self.0.push(cell.clone());
    }

    fn on_crawler_error(&mut self, report: CorruptionReport) {
        panic!("unexpected corruption: {:?}", report);
    }
}

fn crawl_cells(db: &TempDatabase, table: &str) -> Result<Vec<Cell>, Box<dyn std::error::Error>> {
    let mut pager = Pager::open(db.path(), PagerConfig::default())?;
    let mut cells = Cells::default();
    Crawler::new().crawl(&mut pager, db.table_root(table)?, &mut cells)?;
    Ok(cells.0)
}

fn source() -> Result<TempDatabase, Box<dyn std::error::Error>> {
    let db = TempDatabase::with_name("source.db")?;
    db.execute_batch(
        "CREATE TABLE people(id INTEGER PRIMARY KEY, name TEXT NOT NULL, score REAL);
         INSERT INTO people VALUES(3, 'ada', 1.5);
         INSERT INTO people VALUES(10, 'grace', NULL);
         INSERT INTO people VALUES(11, 'linus', 3.25);",
    )?;
    Ok(db)
}

const PEOPLE_SQL: &str = "CREATE TABLE people(id INTEGER PRIMARY KEY, name TEXT NOT NULL, score REAL)";

#[test]
fn test_assemble_rows_with_rowid_alias() -> Result<(), Box<dyn std::error::Error>> {
    let source = source()?;
    let target = TempDatabase::with_name("target.db")?;
    let cells = crawl_cells(&source, "people")?;
    assert_eq!(cells.len(), 3);

    let mut assembler = Assembler::new(RusqliteHandle::open(target.path())?, 2);
    assembler.mark_as_assembling()?;
    assembler.assemble_table("people", PEOPLE_SQL)?;
    for cell in &cells {
        assembler.assemble_cell(cell)?;
    }
    assembler.mark_as_assembled()?;
    assert_eq!(assembler.assembled_cells(), 3);
    assert!(!assembler.handle().is_in_transaction());
    drop(assembler);

    let connection = target.connection()?;
    let rows: Vec<(i64, i64, String)> = connection
        .prepare("SELECT rowid, id, name FROM people ORDER BY rowid")?
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
        .collect::<Result<_, _>>()?;
    assert_eq!(
        rows,
        vec![
            (3, 3, "ada".to_string()),
            (10, 10, "grace".to_string()),
            (11, 11, "linus".to_string()),
        ]
    );
    let dummy: i64 = connection.query_row(
        "SELECT count(*) FROM sqlite_master WHERE name = 'salvage_dummy_sequence'",
        [],
        |row| row.get(0),
    )?;
    assert_eq!(dummy, 0);
    Ok(())
}

#[test]
fn test_assemble_table_is_idempotent() -> Result<(), Box<dyn std::error::Error>> {
    let target = TempDatabase::with_name("target.db")?;
    let mut assembler = Assembler::new(RusqliteHandle::open(target.path())?, 100);
    assembler.mark_as_assembling()?;
    assembler.assemble_table("people", PEOPLE_SQL)?;
    assembler.assemble_table("people", PEOPLE_SQL)?;
    assembler.assemble_sql("CREATE INDEX people_name ON people(name)")?;
    assembler.assemble_sql("CREATE INDEX people_name ON people(name)")?;
    assembler.mark_as_assembled()?;
    drop(assembler);

    let count: i64 = target.connection()?.query_row(
        "SELECT count(*) FROM sqlite_master WHERE tbl_name = 'people'",
        [],
        |row| row.get(0),
    )?;
    assert_eq!(count, 2);
    Ok(())
}

#[test]
fn test_duplicates_from_later_sources() -> Result<(), Box<dyn std::error::Error>> {
    let first = source()?;
    let second = TempDatabase::with_name("older.db")?;
    second.execute_batch(&format!(
        "{};
         INSERT INTO people VALUES(3, 'stale', 0.0);
         INSERT INTO people VALUES(12, 'ken', 2.0);",
        PEOPLE_SQL
    ))?;
    let target = TempDatabase::with_name("target.db")?;

    let mut assembler = Assembler::new(RusqliteHandle::open(target.path())?, 100);
    assembler.mark_as_assembling()?;
    assembler.assemble_table("people", PEOPLE_SQL)?;
    for cell in crawl_cells(&first, "people")? {
        assembler.assemble_cell(&cell)?;
    }

    // A plain insert refuses the conflicting row and moves on.
    for cell in crawl_cells(&second, "people")? {
        assembler.assemble_cell(&cell)?;
    }
    assert_eq!(assembler.skipped_cells(), 1);
    assert_eq!(assembler.assembled_cells(), 4);

    assembler.mark_duplicated_as_ignorable(true);
    assembler.assemble_table("people", PEOPLE_SQL)?;
    for cell in crawl_cells(&second, "people")? {
        assembler.assemble_cell(&cell)?;
    }
    assert_eq!(assembler.skipped_cells(), 1);
    assembler.mark_as_assembled()?;
    drop(assembler);

    let name: String = target.connection()?.query_row(
        "SELECT name FROM people WHERE id = 3",
        [],
        |row| row.get(0),
    )?;
    assert_eq!(name, "ada");
    assert_eq!(target.count_rows("people")?, 4);
    Ok(())
}

#[test]
fn test_assemble_sequence_keeps_the_maximum() -> Result<(), Box<dyn std::error::Error>> {
    let target = TempDatabase::with_name("target.db")?;
    let mut assembler = Assembler::new(RusqliteHandle::open(target.path())?, 100);
    assembler.mark_as_assembling()?;
    assembler.assemble_table(
        "counted",
        "CREATE TABLE counted(id INTEGER PRIMARY KEY AUTOINCREMENT, v TEXT)",
    )?;
    assembler.assemble_sequence("counted", 40)?;
    assembler.assemble_sequence("counted", 7)?;
    assembler.mark_as_assembled()?;
    drop(assembler);

    let connection = target.connection()?;
    let sequence: i64 = connection.query_row(
        "SELECT seq FROM sqlite_sequence WHERE name = 'counted'",
        [],
        |row| row.get(0),
    )?;
    assert_eq!(sequence, 40);
    connection.execute("INSERT INTO counted(v) VALUES('next')", [])?;
    let id: i64 = connection.query_row("SELECT max(id) FROM counted", [], |row| row.get(0))?;
    assert_eq!(id, 41);
    Ok(())
}

#[test]
#[should_panic(expected = "assemble_cell called before assemble_table")]
fn test_cell_before_table_is_a_bug() {
    let source = source().unwrap();
    let target = TempDatabase::with_name("target.db").unwrap();
    let cells = crawl_cells(&source, "people").unwrap();
    let mut assembler = Assembler::new(RusqliteHandle::open(target.path()).unwrap(), 100);
    let _ = assembler.assemble_cell(&cells[0]);
}
