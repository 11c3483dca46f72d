//! Container parsing against hand-assembled and builder-made inputs

use topi_bytecode::{
    CONTAINER_MAGIC, Container, ContainerBuilder, FormatError, FormatVersion, HEADER_LEN, Section,
};

fn header(version: u16) -> Vec<u8> {
    let mut out = CONTAINER_MAGIC.to_vec();
    out.extend_from_slice(&version.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out
}

fn global(out: &mut Vec<u8>, name: &str, index: u32, is_extern: u8, is_mutable: u8) {
    out.push(name.len() as u8);
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(&index.to_le_bytes());
    out.push(is_extern);
    out.push(is_mutable);
}

fn sequential(globals: &[(&str, u32, u8, u8)], boughs: &[(&str, u32)], code: &[u8]) -> Vec<u8> {
    let mut out = header(1);
    out.extend_from_slice(&(globals.len() as u64).to_le_bytes());
    for &(name, index, is_extern, is_mutable) in globals {
        global(&mut out, name, index, is_extern, is_mutable);
    }
    out.extend_from_slice(&(boughs.len() as u64).to_le_bytes());
    for &(name, entry) in boughs {
        out.push(name.len() as u8);
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(&entry.to_le_bytes());
    }
    out.extend_from_slice(code);
    out
}

#[test]
fn test_reports_every_extern_and_bough() {
    for version in [FormatVersion::Sequential, FormatVersion::Offset] {
        let mut builder = ContainerBuilder::new().version(version);
        for i in 0..5 {
            builder.extern_variable(format!("ext{i}"));
            builder.variable(format!("var{i}"));
        }
        for i in 0..3 {
            builder.bough(format!("bough{i}")).end();
        }
        let container = Container::parse(builder.build().unwrap()).unwrap();

        let externs = container.externs();
        assert_eq!(externs.len(), 5);
        assert!(externs.iter().all(|name| name.starts_with("ext")));
        assert_eq!(container.bough_names(), ["bough0", "bough1", "bough2"]);
        assert_eq!(container.slot_count(), 10);
        assert_eq!(container.code().len(), 3);
    }
}

#[test]
fn test_hand_assembled_sequential() {
    let bytes = sequential(
        &[("coins", 0, 0, 1), ("playerName", 1, 1, 1)],
        &[("intro", 0)],
        &[0],
    );
    let container = Container::parse(bytes).unwrap();
    let coins = container.global("coins").unwrap();
    assert!(!coins.is_extern);
    assert!(coins.is_mutable);
    assert!(container.global("playerName").unwrap().is_extern);
    assert_eq!(container.code(), &[0]);
}

#[test]
fn test_truncated_mid_global_table() {
    let bytes = sequential(&[("coins", 0, 0, 1), ("playerName", 1, 1, 1)], &[], &[]);
    // Cut inside the second global's name
    let cut = HEADER_LEN + 8 + (1 + 5 + 6) + 4;
    let err = Container::parse(bytes[..cut].to_vec()).unwrap_err();
    assert!(err.is_truncated());
    assert!(matches!(
        err,
        FormatError::Malformed {
            section: Section::GlobalTable,
            ..
        }
    ));
}

#[test]
fn test_huge_count_with_no_entries() {
    let mut bytes = header(1);
    bytes.extend_from_slice(&u64::MAX.to_le_bytes());
    assert!(Container::parse(bytes).unwrap_err().is_truncated());
}

#[test]
fn test_flag_must_be_zero_or_one() {
    let bytes = sequential(&[("coins", 0, 2, 1)], &[], &[]);
    assert_eq!(
        Container::parse(bytes).unwrap_err(),
        FormatError::InvalidFlag {
            name: "coins".into(),
            flag: "extern",
            byte: 2,
        }
    );
}

#[test]
fn test_duplicate_symbols() {
    let bytes = sequential(&[("a", 0, 0, 1), ("a", 1, 0, 1)], &[], &[]);
    assert_eq!(
        Container::parse(bytes).unwrap_err(),
        FormatError::DuplicateSymbol("a".into())
    );

    let bytes = sequential(&[("a", 0, 0, 1), ("b", 0, 0, 1)], &[], &[]);
    assert_eq!(
        Container::parse(bytes).unwrap_err(),
        FormatError::DuplicateGlobalIndex(0)
    );

    let bytes = sequential(&[], &[("main", 0), ("main", 0)], &[0]);
    assert_eq!(
        Container::parse(bytes).unwrap_err(),
        FormatError::DuplicateBough("main".into())
    );
}

#[test]
fn test_bough_entry_outside_code() {
    let bytes = sequential(&[], &[("main", 4)], &[0]);
    assert!(matches!(
        Container::parse(bytes).unwrap_err(),
        FormatError::EntryOutOfRange { entry: 4, .. }
    ));
}

#[test]
fn test_offset_outside_buffer() {
    let mut bytes = header(2);
    let len = (HEADER_LEN + 24) as u64;
    bytes.extend_from_slice(&len.to_le_bytes());
    bytes.extend_from_slice(&1000u64.to_le_bytes());
    bytes.extend_from_slice(&len.to_le_bytes());
    assert_eq!(
        Container::parse(bytes).unwrap_err(),
        FormatError::OffsetOutOfRange {
            section: Section::BoughTable,
            offset: 1000,
            len: len as usize,
        }
    );
}

#[test]
fn test_offset_layout_uses_wide_bough_names() {
    let long_name = "b".repeat(300);
    let mut builder = ContainerBuilder::new().version(FormatVersion::Offset);
    builder.bough(long_name.clone()).end();
    let container = Container::parse(builder.build().unwrap()).unwrap();
    assert!(container.bough(&long_name).is_some());

    let mut builder = ContainerBuilder::new().version(FormatVersion::Sequential);
    builder.bough(long_name).end();
    assert!(matches!(builder.build(), Err(FormatError::Oversized(_))));
}
