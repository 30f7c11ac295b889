use jewel_core::lockfile::{LockedPackage, Lockfile};
use jewel_core::platform::Platform;
use jewel_core::version::Version;

fn sample() -> Lockfile {
    Lockfile {
        package: vec![
            LockedPackage {
                name: "nokogiri".to_string(),
                version: Version::parse("1.15.4").unwrap(),
                platform: "x86_64-linux".parse().unwrap(),
                source: Some("https://rubygems.org/".to_string()),
                dependencies: vec!["racc (~> 1.4)".to_string()],
            },
            LockedPackage {
                name: "nokogiri".to_string(),
                version: Version::parse("1.15.4").unwrap(),
                platform: "arm64-darwin".parse().unwrap(),
                source: Some("https://rubygems.org/".to_string()),
                dependencies: vec!["racc (~> 1.4)".to_string()],
            },
            LockedPackage {
                name: "racc".to_string(),
                version: Version::parse("1.7.1").unwrap(),
                platform: Platform::Ruby,
                source: None,
                dependencies: vec![],
            },
        ],
    }
}

#[test]
fn serialized_lockfile_parses_back() {
    let lockfile = sample();
    let serialized = lockfile.to_string_pretty().unwrap();
    let parsed = Lockfile::from_toml_str(&serialized).unwrap();
    assert_eq!(parsed.package.len(), 3);
    assert_eq!(parsed.package[0].platform.to_string(), "x86_64-linux");
    assert_eq!(parsed.package[2].platform, Platform::Ruby);
}

#[test]
fn platform_defaults_to_ruby() {
    let parsed = Lockfile::from_toml_str(
        r#"
[[package]]
name = "rake"
version = "13.1.0"
"#,
    )
    .unwrap();
    assert_eq!(parsed.package[0].platform, Platform::Ruby);
    assert!(parsed.package[0].dependencies.is_empty());
}

#[test]
fn locked_versions_groups_platforms() {
    let locked = sample().locked_versions();
    assert_eq!(locked["nokogiri"].len(), 2);
    assert_eq!(locked["racc"][0].0, Version::parse("1.7.1").unwrap());
}

#[test]
fn locked_version_lookup() {
    let lockfile = sample();
    assert_eq!(
        lockfile.locked_version("racc").map(|v| v.to_string()).as_deref(),
        Some("1.7.1")
    );
    assert!(lockfile.locked_version("rails").is_none());
}

#[test]
fn parsed_dependencies() {
    let deps = sample().package[0].parsed_dependencies().unwrap();
    assert_eq!(deps[0].name, "racc");
}

#[test]
fn malformed_version_is_rejected() {
    let err = Lockfile::from_toml_str(
        r#"
[[package]]
name = "rake"
version = "not-a-version"
"#,
    )
    .unwrap_err();
    assert!(err.to_string().contains("Lockfile error"));
}

#[test]
fn write_and_read_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("Jewel.lock");
    sample().write_to(&path).unwrap();
    let loaded = Lockfile::from_path(&path).unwrap();
    assert_eq!(loaded.package.len(), 3);
}
