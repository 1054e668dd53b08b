use salvage::{
    crawler::{
        CrawlOutcome, CrawlState, Crawler, CrawlerClient, SuspendFlag,
        schema::SchemaCrawler,
        sequence::SequenceCrawler,
    },
    storage::pager::{Pager, PagerConfig},
    types::{
        RowId,
        cell::Cell,
        error::{CorruptField, CorruptionReport},
        page::Page,
    },
    utils::mock::TempDatabase,
};

#[derive(Default)]
struct Collector {
    rows: Vec<RowId>,
    pages: usize,
    reports: Vec<CorruptionReport>,
    stop_after: Option<(usize, SuspendFlag)>,
}

impl CrawlerClient for Collector {
    fn on_cell_crawled(&mut self, cell: &Cell) {
        self.rows.push(cell.row_id());
    }

    fn will_crawl_page(&mut self, _page: &Page, _depth: usize) -> bool {
        if let Some((limit, flag)) = &self.stop_after {
            if self.pages >= *limit {
                flag.suspend();
            }
        }
        true
    }

    fn on_page_crawled(&mut self, _page: &Page) {
        self.pages += 1;
    }

    fn on_crawler_error(&mut self, report: CorruptionReport) {
        self.reports.push(report);
    }
}

/// Rows of roughly 600 bytes: a handful per leaf, several leaves.
fn multi_leaf_database(rows: i64) -> Result<TempDatabase, Box<dyn std::error::Error>> {
    let db = TempDatabase::new()?;
    db.execute_batch("CREATE TABLE t(id INTEGER PRIMARY KEY, body TEXT);")?;
    let connection = db.connection()?;
    for id in 1..=rows {
        connection.execute(
            "INSERT INTO t(id, body) VALUES(?1, ?2)",
            rusqlite::params![id, "x".repeat(600)],
        )?;
    }
    Ok(db)
}

#[test]
fn test_crawl_visits_every_row_in_order() -> Result<(), Box<dyn std::error::Error>> {
    let db = multi_leaf_database(60)?;
    let leaves = db.leaf_pages("t")?;
    assert!(leaves.len() > 3);

    let mut pager = Pager::open(db.path(), PagerConfig::default())?;
    let mut crawler = Crawler::new();
    let mut collector = Collector::default();
    let outcome = crawler.crawl(&mut pager, db.table_root("t")?, &mut collector)?;

    assert_eq!(outcome, CrawlOutcome::Completed);
    assert_eq!(crawler.state(), CrawlState::Done);
    assert_eq!(collector.rows, (1..=60).collect::<Vec<RowId>>());
    assert_eq!(collector.pages, leaves.len());
    assert!(collector.reports.is_empty());
    Ok(())
}

#[test]
fn test_corrupted_leaf_is_contained() -> Result<(), Box<dyn std::error::Error>> {
    let db = multi_leaf_database(60)?;
    let leaves = db.leaf_pages("t")?;
    let damaged = leaves[1];

    let rows_on_damaged = {
        let mut pager = Pager::open(db.path(), PagerConfig::default())?;
        Page::decode(&mut pager, damaged)?.cell_count()
    };
    db.zero_page(damaged)?;

    let mut pager = Pager::open(db.path(), PagerConfig::default())?;
    let mut crawler = Crawler::new();
    let mut collector = Collector::default();
    let outcome = crawler.crawl(&mut pager, db.table_root("t")?, &mut collector)?;

    assert_eq!(outcome, CrawlOutcome::Corrupted);
    assert_eq!(crawler.state(), CrawlState::CorruptedSubtree);
    assert_eq!(collector.pages, leaves.len() - 1);
    assert_eq!(collector.rows.len(), 60 - rows_on_damaged);
    assert_eq!(collector.reports.len(), 1);
    assert_eq!(collector.reports[0].page, damaged);
    assert_eq!(collector.reports[0].field, CorruptField::PageType);
    Ok(())
}

#[test]
fn test_child_pointer_loop_is_a_cycle() -> Result<(), Box<dyn std::error::Error>> {
    let db = multi_leaf_database(60)?;
    let root = db.table_root("t")?;
    let leaves = db.leaf_pages("t")?;
    // Right-most child of the interior root now points back at the root.
    db.write_page_bytes(root, 8, &root.to_be_bytes())?;

    let mut pager = Pager::open(db.path(), PagerConfig::default())?;
    let mut crawler = Crawler::new();
    let mut collector = Collector::default();
    let outcome = crawler.crawl(&mut pager, root, &mut collector)?;

    assert_eq!(outcome, CrawlOutcome::Corrupted);
    assert_eq!(collector.pages, leaves.len() - 1);
    assert_eq!(collector.reports.len(), 1);
    assert_eq!(collector.reports[0].field, CorruptField::PageCycle);
    Ok(())
}

#[test]
fn test_suspension_interrupts_the_crawl() -> Result<(), Box<dyn std::error::Error>> {
    let db = multi_leaf_database(60)?;
    let root = db.table_root("t")?;
    let mut pager = Pager::open(db.path(), PagerConfig::default())?;

    let flag = SuspendFlag::new();
    let mut crawler = Crawler::with_flag(flag.clone());
    let mut collector = Collector {
        stop_after: Some((2, flag.clone())),
        ..Collector::default()
    };
    let outcome = crawler.crawl(&mut pager, root, &mut collector)?;
    assert_eq!(outcome, CrawlOutcome::Interrupted);
    assert_eq!(crawler.state(), CrawlState::Suspended);
    assert!(collector.pages < db.leaf_pages("t")?.len());

    flag.resume();
    let mut collector = Collector::default();
    assert_eq!(crawler.crawl(&mut pager, root, &mut collector)?, CrawlOutcome::Completed);
    assert_eq!(collector.rows.len(), 60);
    Ok(())
}

#[test]
fn test_schema_and_sequence_crawlers() -> Result<(), Box<dyn std::error::Error>> {
    let db = TempDatabase::new()?;
    db.execute_batch(
        "CREATE TABLE plain(a TEXT);
         CREATE TABLE counted(id INTEGER PRIMARY KEY AUTOINCREMENT, v TEXT);
         CREATE INDEX plain_a ON plain(a);
         INSERT INTO counted(id, v) VALUES(41, 'x');
         INSERT INTO counted(v) VALUES('y');",
    )?;

    let mut pager = Pager::open(db.path(), PagerConfig::default())?;
    let mut crawler = Crawler::new();
    let schema = SchemaCrawler::work(&mut pager, &mut crawler)?;
    assert!(!schema.is_corrupted());

    let plain = schema.table("plain").expect("plain is in the schema");
    assert_eq!(plain.root_page, db.table_root("plain")?);
    assert_eq!(plain.sql.as_deref(), Some("CREATE TABLE plain(a TEXT)"));

    let index = schema
        .objects()
        .iter()
        .find(|object| object.name == "plain_a")
        .expect("index is in the schema");
    assert!(!index.is_table_definition());
    assert_eq!(index.table_name, "plain");

    let sequence = schema
        .objects()
        .iter()
        .find(|object| object.is_sequence_table())
        .expect("autoincrement creates sqlite_sequence");
    assert!(sequence.is_reserved());

    let sequences = SequenceCrawler::work(&mut pager, &mut crawler, sequence.root_page)?;
    assert_eq!(sequences.sequences().get("counted"), Some(&42));
    assert!(sequences.reports().is_empty());
    Ok(())
}
