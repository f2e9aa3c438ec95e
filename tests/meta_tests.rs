//! Meta-tests that verify test suite integrity
//!
//! These tests ensure that:
//! - No tests are ignored
//! - E2E test files exist
//! - Generator, codec and recovery defaults agree with each other

use std::path::Path;

fn rust_files(dir: &Path, out: &mut Vec<std::path::PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            rust_files(&path, out);
        } else if path.extension().is_some_and(|ext| ext == "rs") {
            out.push(path);
        }
    }
}

/// Verify no tests are ignored in the workspace
///
/// Ignored tests can hide regressions. All tests must run.
#[test]
fn no_ignored_tests() {
    let root = Path::new(env!("CARGO_MANIFEST_DIR"));
    let mut files = Vec::new();
    for dir in ["src", "tests", "benches", "crates"] {
        rust_files(&root.join(dir), &mut files);
    }
    assert!(!files.is_empty(), "no sources found under {}", root.display());

    let marker = concat!("#[", "ignore");
    let ignored: Vec<String> = files
        .iter()
        .filter(|path| {
            std::fs::read_to_string(path)
                .map(|contents| contents.contains(marker))
                .unwrap_or(false)
        })
        .map(|path| path.display().to_string())
        .collect();

    assert!(
        ignored.is_empty(),
        "Found ignored tests - all tests must run.\nFiles:\n{}",
        ignored.join("\n")
    );
}

/// Verify E2E test files exist and are not empty
#[test]
fn e2e_tests_exist() {
    let test_files = [
        "e2e_rtag.rs",
        "e2e_recovery.rs",
        "e2e_failover.rs",
        "e2e_latency.rs",
        "e2e_report.rs",
        "e2e_config.rs",
        "e2e_shutdown.rs",
    ];

    for file in test_files {
        let full_path = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests").join(file);

        assert!(
            full_path.exists(),
            "Missing E2E test file: {}. All E2E tests must be present.",
            file
        );

        let metadata = std::fs::metadata(&full_path).expect("Failed to get file metadata");
        assert!(
            metadata.len() > 100,
            "E2E test file {} appears to be empty or too small ({} bytes)",
            file,
            metadata.len()
        );
    }
}

// ============================================================================
// DEFAULTS INTEGRITY TESTS
// ============================================================================

/// Verify the default generator fits the default frame layout
#[test]
fn default_generator_frame_parses() {
    use frertester::frame::ethernet::{self, FrameHeader, FrameTemplate, DEFAULT_PAYLOAD_SIZE};
    use frertester::traffic::generator::{FrameGenerator, GeneratorConfig};

    let generator = FrameGenerator::new(GeneratorConfig::new(1)).unwrap();
    let config = generator.config();
    assert_eq!(config.payload_size, DEFAULT_PAYLOAD_SIZE);

    let header = FrameHeader {
        dst: config.dst_mac,
        src: config.src_mac,
        vlan: config.vlan,
    };
    let template = FrameTemplate::new(header, config.stream_id, config.payload_size).unwrap();
    let parsed = ethernet::parse(template.bytes()).unwrap();
    assert_eq!(parsed.tag.stream_id, 1);
    assert_eq!(parsed.vlan, config.vlan);
}

/// Verify 1000 frames per second means a 1ms interval
#[test]
fn default_rate_interval_is_1ms() {
    use frertester::traffic::generator::{FrameGenerator, GeneratorConfig};

    let generator = FrameGenerator::new(GeneratorConfig::new(1)).unwrap();
    assert_eq!(generator.interval(), std::time::Duration::from_millis(1));
}

/// Verify recovery defaults match the exported constants
#[test]
fn recovery_defaults_match_constants() {
    let defaults = frertester::RecoveryDefaults::default();
    assert_eq!(defaults.history_window_size, frertester::DEFAULT_HISTORY_WINDOW);
    assert_eq!(
        defaults.reset_timeout,
        std::time::Duration::from_millis(frertester::DEFAULT_RESET_TIMEOUT_MS)
    );
    assert!(!defaults.accept_unknown_streams);
}

/// Verify the default window is usable with wrapping sequence numbers
#[test]
fn default_window_within_half_range() {
    use frertester::recovery::window::MAX_HISTORY_WINDOW;

    assert!(frertester::DEFAULT_HISTORY_WINDOW <= MAX_HISTORY_WINDOW);
    assert_eq!(MAX_HISTORY_WINDOW, 32768);
}
