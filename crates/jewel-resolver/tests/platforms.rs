use std::sync::Arc;

use jewel_core::config::ResolverConfig;
use jewel_core::dependency::Dependency;
use jewel_core::platform::{Platform, PlatformScorer};
use jewel_core::version::Version;
use jewel_resolver::conflict::ConflictCause;
use jewel_resolver::index::{IndexEntry, StaticIndex};
use jewel_resolver::resolver::Resolver;
use jewel_resolver::source::SourceSet;
use jewel_resolver::{resolve, Resolution};

fn dep(s: &str) -> Dependency {
    s.parse().unwrap()
}

fn p(s: &str) -> Platform {
    s.parse().unwrap()
}

fn config(platforms: &[&str]) -> ResolverConfig {
    ResolverConfig {
        platforms: platforms.iter().map(|s| p(s)).collect(),
        ..ResolverConfig::default()
    }
}

/// nokogiri 1.16.0 ships native linux and darwin builds plus a generic one;
/// 1.17.0 only has a linux build so far.
fn sources() -> SourceSet {
    let mut index = StaticIndex::new("https://gems.example");
    let racc = vec![dep("racc (~> 1.4)")];
    for platform in ["ruby", "x86_64-linux", "arm64-darwin"] {
        let mut deps = racc.clone();
        if platform == "ruby" {
            deps.push(dep("mini_portile2 (~> 2.8)"));
        }
        index.add(
            "nokogiri",
            IndexEntry::new(Version::parse("1.16.0").unwrap(), p(platform), deps),
        );
    }
    index.add(
        "nokogiri",
        IndexEntry::new(Version::parse("1.17.0").unwrap(), p("x86_64-linux"), racc),
    );
    index.add(
        "racc",
        IndexEntry::new(Version::parse("1.7.3").unwrap(), Platform::Ruby, vec![]),
    );
    index.add(
        "mini_portile2",
        IndexEntry::new(Version::parse("2.8.5").unwrap(), Platform::Ruby, vec![]),
    );
    index.add(
        "wdm",
        IndexEntry::new(Version::parse("0.1.1").unwrap(), p("x64-mingw-ucrt"), vec![]),
    );
    let mut set = SourceSet::new();
    set.add_remote(Arc::new(index));
    set
}

fn platforms_of(resolution: &Resolution, name: &str) -> Vec<String> {
    resolution
        .activation(name)
        .unwrap()
        .candidates
        .iter()
        .map(|c| c.platform().to_string())
        .collect()
}

#[test]
fn exact_platform_build_preferred() {
    let resolution = resolve(&[dep("nokogiri")], &sources(), &config(&["x86_64-linux"])).unwrap();
    assert_eq!(resolution.version_of("nokogiri").unwrap().to_string(), "1.17.0");
    assert_eq!(platforms_of(&resolution, "nokogiri"), ["x86_64-linux"]);
    assert!(resolution.activation("mini_portile2").is_none());
}

#[test]
fn generic_build_when_no_native_one() {
    let resolution = resolve(&[dep("nokogiri")], &sources(), &config(&["aarch64-linux"])).unwrap();
    assert_eq!(resolution.version_of("nokogiri").unwrap().to_string(), "1.16.0");
    assert_eq!(platforms_of(&resolution, "nokogiri"), ["ruby"]);
    assert!(resolution.activation("mini_portile2").is_some());
}

#[test]
fn platform_wide_dependency_binds_one_build_per_platform() {
    let root = [dep("nokogiri").for_all_platforms()];
    let resolution = resolve(&root, &sources(), &config(&["x86_64-linux", "arm64-darwin"])).unwrap();
    // 1.17.0 has no darwin build, so the whole version is skipped.
    assert_eq!(resolution.version_of("nokogiri").unwrap().to_string(), "1.16.0");
    assert_eq!(
        platforms_of(&resolution, "nokogiri"),
        ["arm64-darwin", "x86_64-linux"]
    );
    let lockfile = resolution.to_lockfile();
    let nokogiri: Vec<_> = lockfile
        .package
        .iter()
        .filter(|p| p.name == "nokogiri")
        .collect();
    assert_eq!(nokogiri.len(), 2);
}

#[test]
fn platform_wide_dependency_fails_without_full_coverage() {
    let root = [dep("wdm").for_all_platforms()];
    let err = resolve(&root, &sources(), &config(&["x64-mingw-ucrt", "x86_64-linux"])).unwrap_err();
    let report = err.report().unwrap();
    assert!(matches!(
        report.conflicts[0].cause,
        ConflictCause::PlatformIncomplete(_)
    ));
}

#[test]
fn platform_filtered_dependencies_are_skipped() {
    let root = [dep("wdm").with_platforms(vec![p("x64-mingw-ucrt")]), dep("racc")];
    let resolution = resolve(&root, &sources(), &config(&["x86_64-linux"])).unwrap();
    assert!(resolution.activation("wdm").is_none());
    assert!(resolution.activation("racc").is_some());
}

#[test]
fn builds_for_other_platforms_are_not_candidates() {
    let err = resolve(&[dep("wdm")], &sources(), &config(&["x86_64-linux"])).unwrap_err();
    assert_eq!(err.report().unwrap().conflicts[0].cause, ConflictCause::NoCandidate);
}

/// Prefers generic builds over native ones.
#[derive(Debug)]
struct PureRubyFirst;

impl PlatformScorer for PureRubyFirst {
    fn score(&self, build: &Platform, _target: &Platform) -> i64 {
        if build.is_generic() {
            0
        } else {
            1
        }
    }
}

#[test]
fn scoring_is_pluggable() {
    let set = sources();
    let config = config(&["arm64-darwin"]);
    let root = [dep("nokogiri (= 1.16.0)")];
    let resolution = Resolver::new(&root, &set, &config)
        .unwrap()
        .with_scorer(Arc::new(PureRubyFirst))
        .run()
        .unwrap();
    assert_eq!(platforms_of(&resolution, "nokogiri"), ["ruby"]);
}

/// `n` 2.0 only has a linux build; 1.0 has linux and darwin builds.
/// `a` needs `n` on every platform.
fn late_platform_wide() -> SourceSet {
    let mut index = StaticIndex::new("https://gems.example");
    index
        .add(
            "n",
            IndexEntry::new(Version::parse("2.0").unwrap(), p("x86_64-linux"), vec![]),
        )
        .add(
            "n",
            IndexEntry::new(Version::parse("1.0").unwrap(), p("x86_64-linux"), vec![]),
        )
        .add(
            "n",
            IndexEntry::new(Version::parse("1.0").unwrap(), p("arm64-darwin"), vec![]),
        )
        .add(
            "a",
            IndexEntry::new(
                Version::parse("1.0").unwrap(),
                Platform::Ruby,
                vec![dep("n").for_all_platforms()],
            ),
        );
    let mut set = SourceSet::new();
    set.add_remote(Arc::new(index));
    set
}

#[test]
fn platform_wide_requirement_after_single_build_binding() {
    let set = late_platform_wide();
    let config = config(&["x86_64-linux", "arm64-darwin"]);

    let resolution = resolve(&[dep("n"), dep("a")], &set, &config).unwrap();
    assert_eq!(resolution.version_of("n").unwrap().to_string(), "1.0");
    assert_eq!(platforms_of(&resolution, "n"), ["arm64-darwin", "x86_64-linux"]);

    let reordered = resolve(&[dep("a"), dep("n")], &set, &config).unwrap();
    assert_eq!(resolution.all_activated(), reordered.all_activated());
}

#[test]
fn single_platform_resolution_keeps_the_newest_build() {
    let set = late_platform_wide();
    let resolution = resolve(&[dep("n")], &set, &config(&["x86_64-linux", "arm64-darwin"])).unwrap();
    assert_eq!(resolution.version_of("n").unwrap().to_string(), "2.0");
    assert_eq!(platforms_of(&resolution, "n"), ["x86_64-linux"]);
}
