use std::path::PathBuf;

use lodge_common::VersionKey;
use lodge_db::{Database, MigrationRunner, OpenOptions, load_migrations};

/// The migration set shipped at the repository root.
fn shipped_migrations() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../migrations")
}

const TABLES: [&str; 9] = [
    "Roles",
    "Users",
    "UserRoles",
    "Sessions",
    "RefreshTokens",
    "Rooms",
    "Amenities",
    "RoomAmenities",
    "Holidays",
];

#[test]
fn shipped_migrations_load_in_version_order() {
    let units = load_migrations(&shipped_migrations()).unwrap();
    assert_eq!(units.len(), 11);

    let versions: Vec<&VersionKey> = units.iter().map(|u| &u.version).collect();
    let mut sorted = versions.clone();
    sorted.sort();
    assert_eq!(versions, sorted);
    assert!(units.iter().all(|u| u.is_reversible()));
    assert_eq!(units.last().unwrap().name, "add_room_max_guests");
}

#[test]
fn shipped_migrations_apply_and_roll_back_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(&dir.path().join("hotel.db"), &OpenOptions::default()).unwrap();
    let runner = MigrationRunner::new();
    let units = load_migrations(&shipped_migrations()).unwrap();

    assert_eq!(runner.apply(&db, &units).unwrap(), units.len());
    for table in TABLES {
        assert!(db.table_exists(table).unwrap(), "{table} missing");
    }
    assert!(db.index_exists("IX_RefreshTokens_Active").unwrap());
    assert_eq!(db.row_count("Roles").unwrap(), 3);
    assert_eq!(db.row_count("Holidays").unwrap(), 2);
    assert!(
        db.column_names("Rooms")
            .unwrap()
            .contains(&"MaxGuests".to_string())
    );

    let holiday: String = db
        .connection()
        .unwrap()
        .query_row(
            "SELECT Name FROM Holidays WHERE Date = '2025-01-01'",
            [],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(holiday, "New Year's Day");

    assert_eq!(runner.verify(&db, &units).unwrap(), units.len());
    assert!(runner.status(&db, &units).unwrap().all(|s| s.applied));

    assert_eq!(runner.rollback(&db, &units, units.len()).unwrap(), units.len());
    for table in TABLES {
        assert!(!db.table_exists(table).unwrap(), "{table} left behind");
    }
    assert_eq!(runner.verify(&db, &units).unwrap(), 0);
}

#[test]
fn seeded_rows_are_removed_by_their_own_rollback() {
    let db = Database::in_memory().unwrap();
    let runner = MigrationRunner::new();
    let units = load_migrations(&shipped_migrations()).unwrap();
    runner.apply(&db, &units).unwrap();

    // Undo MaxGuests, then the role seed.
    runner.rollback(&db, &units, 2).unwrap();
    assert!(db.table_exists("Roles").unwrap());
    assert_eq!(db.row_count("Roles").unwrap(), 0);
    assert!(
        !db.column_names("Rooms")
            .unwrap()
            .contains(&"MaxGuests".to_string())
    );
}
