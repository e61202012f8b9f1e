use ember_core::{Config, Db, EmberError, RwMethod};
use std::fs;
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::time::Duration;
use tempfile::tempdir;

fn test_config(dir: &Path, block_size: u64) -> Config {
    Config {
        dir_path: dir.to_path_buf(),
        block_size,
        reclaim_threshold: 1,
        ..Config::default()
    }
}

fn segment_count(dir: &Path) -> usize {
    fs::read_dir(dir)
        .unwrap()
        .filter(|entry| {
            entry
                .as_ref()
                .unwrap()
                .file_name()
                .to_string_lossy()
                .ends_with(".data.hash")
        })
        .count()
}

#[test]
fn test_set_get_replace_counts() {
    let dir = tempdir().unwrap();
    let db = Db::open(test_config(dir.path(), 4096)).unwrap();

    assert_eq!(db.hset(b"users:1", b"name", b"alice").unwrap(), 1);
    assert_eq!(db.hget(b"users:1", b"name").unwrap().unwrap(), b"alice");
    assert_eq!(db.hset(b"users:1", b"name", b"bob").unwrap(), 0);
    assert_eq!(db.hget(b"users:1", b"name").unwrap().unwrap(), b"bob");
    assert_eq!(db.hget(b"users:1", b"missing").unwrap(), None);

    assert_eq!(db.hsetnx(b"users:1", b"name", b"carol").unwrap(), 0);
    assert_eq!(db.hget(b"users:1", b"name").unwrap().unwrap(), b"bob");
    assert_eq!(db.hsetnx(b"users:1", b"age", b"30").unwrap(), 1);

    assert!(db.hexists(b"users:1", b"age").unwrap());
    assert_eq!(db.hlen(b"users:1").unwrap(), 2);
    assert_eq!(db.hlen(b"users:2").unwrap(), 0);

    db.close().unwrap();
}

#[test]
fn test_validation_errors() {
    let dir = tempdir().unwrap();
    let db = Db::open(test_config(dir.path(), 4096)).unwrap();

    assert!(matches!(
        db.hset(b"", b"f", b"v"),
        Err(EmberError::EmptyKey)
    ));
    let long_key = vec![b'k'; 1024];
    assert!(matches!(
        db.hset(&long_key, b"f", b"v"),
        Err(EmberError::KeyTooLarge)
    ));
    let big_value = vec![b'v'; 2 * 1024 * 1024];
    assert!(matches!(
        db.hset(b"k", b"f", &big_value),
        Err(EmberError::ValueTooLarge)
    ));
    assert!(matches!(
        db.hset(b"k", b"fie\\0ld", b"v"),
        Err(EmberError::ExtraContainsSeparator)
    ));
    assert!(matches!(db.hexpire(b"k", 0), Err(EmberError::InvalidTtl)));

    db.close().unwrap();
}

#[test]
fn test_hdel_counts_and_enumeration() {
    let dir = tempdir().unwrap();
    let db = Db::open(test_config(dir.path(), 4096)).unwrap();

    db.hset(b"h", b"f1", b"v1").unwrap();
    db.hset(b"h", b"f2", b"v2").unwrap();
    db.hset(b"h", b"f3", b"v3").unwrap();

    let mut keys = db.hkeys(b"h").unwrap();
    keys.sort();
    assert_eq!(keys, vec![b"f1".to_vec(), b"f2".to_vec(), b"f3".to_vec()]);

    let mut vals = db.hvals(b"h").unwrap();
    vals.sort();
    assert_eq!(vals, vec![b"v1".to_vec(), b"v2".to_vec(), b"v3".to_vec()]);

    let removed = db
        .hdel(b"h", &[b"f1".as_slice(), b"f2".as_slice(), b"nope".as_slice()])
        .unwrap();
    assert_eq!(removed, 2);
    assert_eq!(db.hlen(b"h").unwrap(), 1);

    assert!(db.hclear(b"h").unwrap());
    assert!(!db.hclear(b"h").unwrap());
    assert_eq!(db.hlen(b"h").unwrap(), 0);

    db.close().unwrap();
}

#[test]
fn test_persistence_across_segments() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path(), 512);

    {
        let db = Db::open(config.clone()).unwrap();
        for i in 0..200u32 {
            let key = format!("user:{}", i);
            let value = format!("value-{}", i);
            assert_eq!(db.hset(key.as_bytes(), b"name", value.as_bytes()).unwrap(), 1);
        }
        db.close().unwrap();
    }
    // The writes must have spanned more than one segment, and no segment may
    // exceed the block size.
    assert!(segment_count(dir.path()) > 1);
    for entry in fs::read_dir(dir.path()).unwrap() {
        let entry = entry.unwrap();
        if entry.file_name().to_string_lossy().ends_with(".data.hash") {
            assert!(entry.metadata().unwrap().len() <= 512);
        }
    }

    // Reopen through the config snapshot the close left behind.
    let db = Db::reopen(dir.path()).unwrap();
    for i in 0..200u32 {
        let key = format!("user:{}", i);
        let value = format!("value-{}", i);
        assert_eq!(db.hlen(key.as_bytes()).unwrap(), 1);
        assert_eq!(
            db.hget(key.as_bytes(), b"name").unwrap().unwrap(),
            value.as_bytes()
        );
    }
    db.close().unwrap();
}

#[test]
fn test_round_trip_after_mixed_operations() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path(), 512);

    let expected = {
        let db = Db::open(config.clone()).unwrap();
        db.hset(b"a", b"f1", b"1").unwrap();
        db.hset(b"a", b"f2", b"2").unwrap();
        db.hset(b"a", b"f1", b"1-bis").unwrap();
        db.hsetnx(b"a", b"f3", b"3").unwrap();
        db.hdel(b"a", &[b"f2".as_slice()]).unwrap();
        db.hset(b"b", b"f", b"x").unwrap();
        db.hclear(b"b").unwrap();
        db.hset(b"b", b"g", b"y").unwrap();

        let mut snapshot = db.hgetall(b"a").unwrap();
        snapshot.sort();
        db.close().unwrap();
        snapshot
    };

    let db = Db::reopen(dir.path()).unwrap();
    let mut replayed = db.hgetall(b"a").unwrap();
    replayed.sort();
    assert_eq!(replayed, expected);
    assert_eq!(db.hlen(b"b").unwrap(), 1);
    assert_eq!(db.hget(b"b", b"g").unwrap().unwrap(), b"y");
    db.close().unwrap();
}

#[test]
fn test_reclaim_drops_superseded_records() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path(), 512);
    let db = Db::open(config.clone()).unwrap();

    for i in 0..60u32 {
        let key = format!("user:{}", i);
        db.hset(key.as_bytes(), b"name", format!("first-{}", i).as_bytes())
            .unwrap();
    }
    for i in 0..60u32 {
        let key = format!("user:{}", i);
        db.hset(key.as_bytes(), b"name", format!("second-{}", i).as_bytes())
            .unwrap();
    }

    let before = segment_count(dir.path());
    db.reclaim().unwrap();
    let after = segment_count(dir.path());
    assert!(after < before, "reclaim should shrink the directory ({} -> {})", before, after);

    for i in 0..60u32 {
        let key = format!("user:{}", i);
        assert_eq!(
            db.hget(key.as_bytes(), b"name").unwrap().unwrap(),
            format!("second-{}", i).as_bytes()
        );
    }

    // Back-to-back reclaim with no intervening writes changes nothing.
    db.reclaim().unwrap();
    assert_eq!(segment_count(dir.path()), after);

    db.close().unwrap();

    let db = Db::reopen(dir.path()).unwrap();
    for i in 0..60u32 {
        let key = format!("user:{}", i);
        assert_eq!(
            db.hget(key.as_bytes(), b"name").unwrap().unwrap(),
            format!("second-{}", i).as_bytes()
        );
    }
    db.close().unwrap();
}

#[test]
fn test_reclaim_unreached() {
    let dir = tempdir().unwrap();
    let config = Config {
        reclaim_threshold: 4,
        ..test_config(dir.path(), 4096)
    };
    let db = Db::open(config).unwrap();
    db.hset(b"k", b"f", b"v").unwrap();
    assert!(matches!(db.reclaim(), Err(EmberError::ReclaimUnreached)));
    db.close().unwrap();
}

#[test]
fn test_corrupted_segment_fails_reopen() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path(), 256);

    let first_key = b"user:0";
    {
        let db = Db::open(config.clone()).unwrap();
        for i in 0..20u32 {
            let key = format!("user:{}", i);
            db.hset(key.as_bytes(), b"name", format!("value-{}", i).as_bytes())
                .unwrap();
        }
        db.close().unwrap();
    }
    assert!(segment_count(dir.path()) > 1);

    // Flip one byte inside the value region of the first record of the first
    // segment.
    let path = dir.path().join("000000000.data.hash");
    let file = fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(&path)
        .unwrap();
    let value_offset = 26 + first_key.len() as u64;
    let mut byte = [0u8; 1];
    file.read_exact_at(&mut byte, value_offset).unwrap();
    byte[0] ^= 0xff;
    file.write_all_at(&byte, value_offset).unwrap();
    drop(file);

    match Db::open(config) {
        Err(EmberError::InvalidCrc) => {}
        other => panic!("expected InvalidCrc, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_expiration_is_lazy() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path(), 4096);
    let db = Db::open(config.clone()).unwrap();

    db.hset(b"session", b"token", b"abc").unwrap();
    assert!(db.hexpire(b"session", 1).unwrap());
    assert!(db.httl(b"session").unwrap() >= 0);
    assert!(db.httl(b"session").unwrap() <= 1);

    assert!(!db.hexpire(b"missing", 10).unwrap());

    std::thread::sleep(Duration::from_millis(2100));

    // The next operation observes the key as absent and persists a clear.
    assert_eq!(db.hget(b"session", b"token").unwrap(), None);
    assert_eq!(db.hlen(b"session").unwrap(), 0);
    assert_eq!(db.httl(b"session").unwrap(), 0);
    db.close().unwrap();

    let db = Db::reopen(dir.path()).unwrap();
    assert_eq!(db.hget(b"session", b"token").unwrap(), None);
    db.close().unwrap();
}

#[test]
fn test_close_is_idempotent_and_rejects_operations() {
    let dir = tempdir().unwrap();
    let db = Db::open(test_config(dir.path(), 4096)).unwrap();
    db.hset(b"k", b"f", b"v").unwrap();

    db.close().unwrap();
    db.close().unwrap();
    assert!(matches!(db.hset(b"k", b"f", b"v2"), Err(EmberError::DbClosed)));
    assert!(matches!(db.hget(b"k", b"f"), Err(EmberError::DbClosed)));
    assert!(matches!(db.sync(), Err(EmberError::DbClosed)));
}

#[test]
fn test_mmap_round_trip() {
    let dir = tempdir().unwrap();
    let config = Config {
        rw_method: RwMethod::Mmap,
        ..test_config(dir.path(), 4096)
    };

    {
        let db = Db::open(config.clone()).unwrap();
        db.hset(b"m", b"f1", b"v1").unwrap();
        db.hset(b"m", b"f2", b"v2").unwrap();
        db.close().unwrap();
    }

    // Reopen, check the replayed state, then append more: the watermark must
    // sit right after the recovered records.
    {
        let db = Db::open(config.clone()).unwrap();
        assert_eq!(db.hlen(b"m").unwrap(), 2);
        assert_eq!(db.hget(b"m", b"f1").unwrap().unwrap(), b"v1");
        db.hset(b"m", b"f3", b"v3").unwrap();
        db.close().unwrap();
    }

    let db = Db::open(config).unwrap();
    assert_eq!(db.hlen(b"m").unwrap(), 3);
    assert_eq!(db.hget(b"m", b"f3").unwrap().unwrap(), b"v3");
    db.close().unwrap();
}

#[test]
fn test_reopen_without_snapshot() {
    let dir = tempdir().unwrap();
    assert!(matches!(
        Db::reopen(dir.path()),
        Err(EmberError::ConfigNotExist)
    ));
}

#[test]
fn test_backup_copies_directory() {
    let dir = tempdir().unwrap();
    let backup_dir = tempdir().unwrap();
    let target = backup_dir.path().join("copy");

    let db = Db::open(test_config(dir.path(), 4096)).unwrap();
    db.hset(b"k", b"f", b"v").unwrap();
    db.sync().unwrap();
    db.backup(&target).unwrap();
    db.close().unwrap();

    assert!(target.join("000000000.data.hash").exists());
}
