use std::{
    fs,
    time::{Duration, SystemTime},
};

use salvage::{
    material::{Content, Info, Material, first_material_path, last_material_path, load_material, save_material},
    repair::{backup::Backup, locks::NoLocks},
    storage::pager::PagerConfig,
    types::error::RepairError,
    utils::mock::{MOCK_PAGE_SIZE, TempDatabase},
};

fn material_with_sequence(sequence: i64) -> Material {
    let mut material = Material::new(Info {
        page_size: MOCK_PAGE_SIZE,
        ..Info::default()
    });
    material.contents.insert(
        "t".to_string(),
        Content {
            sql: "CREATE TABLE t(a)".to_string(),
            sequence,
            verified_pages: [(2, 0xdead_beef)].into_iter().collect(),
            ..Content::default()
        },
    );
    material
}

fn set_modified(path: &std::path::Path, time: SystemTime) -> std::io::Result<()> {
    fs::File::options().write(true).open(path)?.set_modified(time)
}

#[test]
fn test_slots_rotate_to_the_older_one() -> Result<(), Box<dyn std::error::Error>> {
    let db = TempDatabase::new()?;
    let first = first_material_path(db.path());
    let last = last_material_path(db.path());
    assert!(load_material(db.path())?.is_none());

    assert_eq!(save_material(db.path(), &material_with_sequence(1))?, first);
    assert_eq!(save_material(db.path(), &material_with_sequence(2))?, last);
    assert_eq!(load_material(db.path())?, Some(material_with_sequence(2)));

    let now = SystemTime::now();
    set_modified(&first, now - Duration::from_secs(3600))?;
    set_modified(&last, now)?;
    assert_eq!(save_material(db.path(), &material_with_sequence(3))?, first);
    set_modified(&first, now + Duration::from_secs(60))?;
    assert_eq!(load_material(db.path())?, Some(material_with_sequence(3)));
    Ok(())
}

#[test]
fn test_corrupted_slot_falls_back_to_the_other() -> Result<(), Box<dyn std::error::Error>> {
    let db = TempDatabase::new()?;
    save_material(db.path(), &material_with_sequence(1))?;
    let newest = save_material(db.path(), &material_with_sequence(2))?;

    let mut bytes = fs::read(&newest)?;
    let middle = bytes.len() / 2;
    bytes[middle] ^= 0xff;
    fs::write(&newest, bytes)?;
    assert!(matches!(
        Material::load_from(&newest),
        Err(RepairError::MaterialCorrupt { .. })
    ));

    assert_eq!(load_material(db.path())?, Some(material_with_sequence(1)));

    fs::write(first_material_path(db.path()), b"")?;
    assert!(load_material(db.path())?.is_none());
    Ok(())
}

#[test]
fn test_backup_records_verified_leaves() -> Result<(), Box<dyn std::error::Error>> {
    let db = TempDatabase::new()?;
    db.execute_batch(
        "CREATE TABLE notes(id INTEGER PRIMARY KEY AUTOINCREMENT, body TEXT);
         CREATE INDEX notes_body ON notes(body);
         CREATE TABLE empty(a);
         CREATE TABLE keyed(k TEXT PRIMARY KEY, v) WITHOUT ROWID;",
    )?;
    let connection = db.connection()?;
    for id in 1..=40 {
        connection.execute(
            "INSERT INTO notes(body) VALUES(?1)",
            [format!("{:0>500}", id)],
        )?;
    }
    drop(connection);

    let mut backup = Backup::new(PagerConfig::default());
    let material = backup.produce(db.path(), &mut NoLocks)?;

    assert_eq!(material.info.page_size, MOCK_PAGE_SIZE);
    assert_eq!(material.info.reserved_bytes, 0);
    assert!(!material.contents.contains_key("keyed"));
    assert!(!material.contents.contains_key("sqlite_sequence"));

    let notes = &material.contents["notes"];
    assert_eq!(
        notes.verified_pages.keys().copied().collect::<Vec<_>>(),
        {
            let mut leaves = db.leaf_pages("notes")?;
            leaves.sort_unstable();
            leaves
        }
    );
    assert_eq!(notes.sequence, 40);
    assert_eq!(
        notes.associated_sqls,
        vec!["CREATE INDEX notes_body ON notes(body)".to_string()]
    );

    let empty = &material.contents["empty"];
    assert_eq!(empty.verified_pages.len(), 1);
    assert!(empty.verified_pages.contains_key(&db.table_root("empty")?));

    // What is saved is exactly what is loaded back.
    save_material(db.path(), &material)?;
    assert_eq!(load_material(db.path())?, Some(material));
    Ok(())
}

#[test]
fn test_backup_leaves_out_damaged_tables() -> Result<(), Box<dyn std::error::Error>> {
    let db = TempDatabase::new()?;
    db.execute_batch("CREATE TABLE good(a); CREATE TABLE bad(a TEXT);")?;
    let connection = db.connection()?;
    for id in 0..30 {
        connection.execute("INSERT INTO bad(a) VALUES(?1)", ["y".repeat(700 + id)])?;
    }
    connection.execute("INSERT INTO good(a) VALUES(1)", [])?;
    drop(connection);
    let leaves = db.leaf_pages("bad")?;
    db.zero_page(leaves[0])?;

    let mut backup = Backup::new(PagerConfig::default());
    let material = backup.produce(db.path(), &mut NoLocks)?;
    assert!(material.contents.contains_key("good"));
    assert!(!material.contents.contains_key("bad"));
    assert_eq!(backup.skipped_tables(), &["bad".to_string()]);
    Ok(())
}

#[test]
fn test_backup_fails_on_damaged_schema() -> Result<(), Box<dyn std::error::Error>> {
    let db = TempDatabase::new()?;
    db.execute_batch("CREATE TABLE t(a); INSERT INTO t VALUES(1);")?;
    // Page type byte of the schema page, right after the database header.
    db.write_page_bytes(1, 100, &[0x00])?;

    let mut backup = Backup::new(PagerConfig::default());
    assert!(matches!(
        backup.produce(db.path(), &mut NoLocks),
        Err(RepairError::Corruption { page: 1, .. })
    ));
    Ok(())
}
