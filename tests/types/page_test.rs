use salvage::{
    storage::pager::{Pager, PagerConfig},
    types::{
        HEADER_SIZE,
        error::{CorruptField, RepairError},
        page::{Page, PageType},
    },
    utils::mock::{MOCK_PAGE_SIZE, TempDatabase},
};

const USABLE: usize = MOCK_PAGE_SIZE as usize;

fn leaf_with_pointers(pointers: &[u16]) -> Vec<u8> {
    let mut data = vec![0u8; USABLE];
    data[0] = PageType::LeafTable.as_u8();
    data[3..5].copy_from_slice(&(pointers.len() as u16).to_be_bytes());
    for (index, pointer) in pointers.iter().enumerate() {
        let at = 8 + index * 2;
        data[at..at + 2].copy_from_slice(&pointer.to_be_bytes());
    }
    data
}

#[test]
fn test_page_type_flags() {
    assert_eq!(PageType::from_flag(2, 7).unwrap(), PageType::InteriorIndex);
    assert_eq!(PageType::from_flag(5, 7).unwrap(), PageType::InteriorTable);
    assert_eq!(PageType::from_flag(10, 7).unwrap(), PageType::LeafIndex);
    assert_eq!(PageType::from_flag(13, 7).unwrap(), PageType::LeafTable);
    assert_eq!(PageType::LeafTable.header_size(), 8);
    assert_eq!(PageType::InteriorTable.header_size(), 12);

    match PageType::from_flag(0, 7) {
        Err(RepairError::Corruption { page, field, .. }) => {
            assert_eq!(page, 7);
            assert_eq!(field, CorruptField::PageType);
        }
        other => panic!("Expected PageType corruption, got {:?}", other),
    }
}

#[test]
fn test_leaf_parsing_and_local_thresholds() {
    let page = Page::from_bytes(3, leaf_with_pointers(&[4000, 3900]), USABLE).unwrap();

    assert_eq!(page.number(), 3);
    assert!(page.is_leaf());
    assert_eq!(page.header_offset(), 0);
    assert_eq!(page.cell_count(), 2);
    assert_eq!(page.cell_offsets(), &[4000, 3900]);
    assert_eq!(page.right_most(), None);
    assert_eq!(page.max_local(), USABLE - 35);
    assert_eq!(page.min_local(), (USABLE - 12) * 32 / 255 - 23);
}

#[test]
fn test_cell_pointer_bounds() {
    // Inside the pointer array itself.
    let result = Page::from_bytes(3, leaf_with_pointers(&[9]), USABLE);
    assert!(matches!(
        result,
        Err(RepairError::Corruption { field: CorruptField::CellPointer, .. })
    ));

    // Past the usable area.
    let result = Page::from_bytes(3, leaf_with_pointers(&[USABLE as u16]), USABLE - 16);
    assert!(matches!(
        result,
        Err(RepairError::Corruption { field: CorruptField::CellPointer, .. })
    ));

    let mut data = leaf_with_pointers(&[]);
    data[3..5].copy_from_slice(&u16::MAX.to_be_bytes());
    assert!(matches!(
        Page::from_bytes(3, data, USABLE),
        Err(RepairError::Corruption { field: CorruptField::CellPointer, .. })
    ));
}

#[test]
fn test_interior_children_end_with_right_most() {
    let mut data = vec![0u8; USABLE];
    data[0] = PageType::InteriorTable.as_u8();
    data[3..5].copy_from_slice(&2u16.to_be_bytes());
    data[8..12].copy_from_slice(&9u32.to_be_bytes());
    data[12..14].copy_from_slice(&4000u16.to_be_bytes());
    data[14..16].copy_from_slice(&4010u16.to_be_bytes());
    // Each interior cell: left child, then a rowid varint.
    data[4000..4004].copy_from_slice(&4u32.to_be_bytes());
    data[4004] = 10;
    data[4010..4014].copy_from_slice(&6u32.to_be_bytes());
    data[4014] = 20;

    let page = Page::from_bytes(2, data, USABLE).unwrap();
    assert!(!page.is_leaf());
    assert_eq!(page.right_most(), Some(9));
    assert_eq!(page.child_page_numbers().unwrap(), vec![4, 6, 9]);
}

#[test]
fn test_first_page_header_follows_database_header() -> Result<(), Box<dyn std::error::Error>> {
    let db = TempDatabase::new()?;
    db.execute_batch("CREATE TABLE t(a INTEGER, b TEXT); INSERT INTO t VALUES(1, 'x');")?;

    let mut pager = Pager::open(db.path(), PagerConfig::default())?;
    let schema = Page::decode(&mut pager, 1)?;
    assert_eq!(schema.header_offset(), HEADER_SIZE);
    assert_eq!(schema.page_type(), PageType::LeafTable);
    assert_eq!(schema.cell_count(), 1);

    let root = Page::decode(&mut pager, db.table_root("t")?)?;
    assert_eq!(root.header_offset(), 0);
    assert_eq!(root.cell_count(), 1);
    Ok(())
}

#[test]
fn test_hash_tracks_page_bytes() -> Result<(), Box<dyn std::error::Error>> {
    let db = TempDatabase::new()?;
    db.execute_batch("CREATE TABLE t(a INTEGER); INSERT INTO t VALUES(1);")?;
    let root = db.table_root("t")?;

    let before = {
        let mut pager = Pager::open(db.path(), PagerConfig::default())?;
        Page::decode(&mut pager, root)?.hash()
    };
    db.execute_batch("INSERT INTO t VALUES(2);")?;
    let mut pager = Pager::open(db.path(), PagerConfig::default())?;
    let after = Page::decode(&mut pager, root)?;
    assert_ne!(before, after.hash());
    assert_eq!(after.hash(), Page::decode(&mut pager, root)?.hash());
    Ok(())
}
