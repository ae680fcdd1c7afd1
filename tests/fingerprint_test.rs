use abi_sign::generate_fingerprint;
use std::fs;

fn read_snapshot(file_name: &str) -> String {
    fs::read_to_string(format!("tests/data/snapshots/{file_name}"))
        .expect("Could not read test snapshot file")
}

#[test]
fn test_fingerprint_consistency_for_identical_files() {
    let hash1 = generate_fingerprint(&read_snapshot("demo_v1.json")).unwrap();
    let hash2 = generate_fingerprint(&read_snapshot("demo_v1.json")).unwrap();

    assert_eq!(hash1, hash2);
    assert_eq!(hash1.len(), 64);
}

#[test]
fn test_fingerprint_ignores_order_and_metadata() {
    // Same surface, elements shuffled, different timestamp, tool version and warnings.
    let hash_v1 = generate_fingerprint(&read_snapshot("demo_v1.json")).unwrap();
    let hash_shuffled = generate_fingerprint(&read_snapshot("demo_v1_shuffled.json")).unwrap();

    assert_eq!(hash_v1, hash_shuffled);
}

#[test]
fn test_fingerprint_detects_surface_change() {
    let hash_v1 = generate_fingerprint(&read_snapshot("demo_v1.json")).unwrap();
    let hash_v2 = generate_fingerprint(&read_snapshot("demo_v2_breaking.json")).unwrap();

    assert_ne!(hash_v1, hash_v2);
}

#[test]
fn test_fingerprint_detects_version_change() {
    let v1 = read_snapshot("demo_v1.json");
    let bumped = v1.replace(r#""patch": 3"#, r#""patch": 4"#);
    assert_ne!(v1, bumped);

    assert_ne!(
        generate_fingerprint(&v1).unwrap(),
        generate_fingerprint(&bumped).unwrap()
    );
}

#[test]
fn test_fingerprint_rejects_invalid_snapshot() {
    assert!(generate_fingerprint(&read_snapshot("truncated.json")).is_err());
    assert!(generate_fingerprint("{}").is_err());
}
