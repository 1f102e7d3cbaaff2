//! TAP (Test Anything Protocol) harness for on-device tests.
//!
//! Host unit tests cover the provisioning logic; this harness runs the parts
//! that touch real peripherals (NVS, the frame codec on the target's
//! layout) on QEMU or a board, printing TAP to the serial console.
//!
//! Only built with the `tap-tests` feature, so none of it reaches a
//! production image.
//!
//! # Usage
//!
//! ```ignore
//! #[cfg(feature = "tap-tests")]
//! mod tap_tests {
//!     use super::*;
//!     use blufi_provisioner_macros::tap_test;
//!
//!     #[tap_test]
//!     fn ssid_round_trips() -> blufi_provisioner::testing::TestResult {
//!         let store = NvsStore::open("blufi_test")?;
//!         // ...
//!         Ok(())
//!     }
//! }
//! ```
//!
//! `src/bin/device-tests.rs` collects every `#[tap_test]` and runs them.
//! Set `BLUFI_TAP_FILTER` to run only tests whose name contains it.

use std::panic::{catch_unwind, AssertUnwindSafe};

// Used by the code `#[tap_test]` expands to
pub use inventory;

/// Environment variable holding a test name filter.
pub const FILTER_ENV: &str = "BLUFI_TAP_FILTER";

pub type TestResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

pub type TestRegisterFn = fn(&mut TestRunner);

/// A test registered by `#[tap_test]`.
pub struct TapTestEntry {
    pub name: &'static str,
    pub register: TestRegisterFn,
}

impl TapTestEntry {
    pub const fn new(name: &'static str, register: TestRegisterFn) -> Self {
        Self { name, register }
    }
}

inventory::collect!(TapTestEntry);

fn selected(filter: Option<&str>) -> Vec<&'static TapTestEntry> {
    inventory::iter::<TapTestEntry>
        .into_iter()
        .filter(|entry| filter.map_or(true, |f| entry.name.contains(f)))
        .collect()
}

/// Run every registered test whose name contains `filter`.
///
/// Returns `true` when none failed.
pub fn run_matching(filter: Option<&str>) -> bool {
    let entries = selected(filter);
    let mut runner = TestRunner::new();
    runner.print_header(entries.len());
    if let Some(filter) = filter {
        TestRunner::comment(&format!("filter: {}", filter));
    }
    for entry in entries {
        (entry.register)(&mut runner);
    }
    runner.finish()
}

/// Run all registered tests, honouring [`FILTER_ENV`].
pub fn run_all_tests() -> bool {
    let filter = std::env::var(FILTER_ENV).ok().filter(|f| !f.is_empty());
    run_matching(filter.as_deref())
}

enum Outcome {
    Pass,
    Fail(String),
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Runs tests and prints one TAP line per test.
#[derive(Default)]
pub struct TestRunner {
    tests_run: usize,
    tests_passed: usize,
    tests_failed: usize,
}

impl TestRunner {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&mut self, name: &str, outcome: Outcome) {
        self.tests_run += 1;
        match outcome {
            Outcome::Pass => {
                self.tests_passed += 1;
                println!("ok {} - {}", self.tests_run, name);
            }
            Outcome::Fail(reason) => {
                self.tests_failed += 1;
                println!("not ok {} - {}", self.tests_run, name);
                println!("# {}", reason);
            }
        }
    }

    /// Run a test returning a result. Panics count as failures.
    pub fn run<F>(&mut self, name: &str, test_fn: F)
    where
        F: FnOnce() -> TestResult + std::panic::UnwindSafe,
    {
        let outcome = match catch_unwind(AssertUnwindSafe(test_fn)) {
            Ok(Ok(())) => Outcome::Pass,
            Ok(Err(e)) => Outcome::Fail(format!("Error: {}", e)),
            Err(payload) => Outcome::Fail(format!("Panic: {}", panic_message(&*payload))),
        };
        self.record(name, outcome);
    }

    /// Run a test that signals failure by panicking.
    pub fn run_assert<F>(&mut self, name: &str, test_fn: F)
    where
        F: FnOnce() + std::panic::UnwindSafe,
    {
        self.run(name, || {
            test_fn();
            Ok(())
        });
    }

    /// Run a test that must panic, optionally with a message containing `expected`.
    pub fn run_should_panic<F>(&mut self, name: &str, test_fn: F, expected: Option<&str>)
    where
        F: FnOnce() + std::panic::UnwindSafe,
    {
        let outcome = match catch_unwind(AssertUnwindSafe(test_fn)) {
            Ok(()) => Outcome::Fail("Expected panic but test completed normally".into()),
            Err(payload) => {
                let msg = panic_message(&*payload);
                match expected {
                    Some(expected) if !msg.contains(expected) => Outcome::Fail(format!(
                        "Expected panic containing '{}', got '{}'",
                        expected, msg
                    )),
                    _ => Outcome::Pass,
                }
            }
        };
        self.record(name, outcome);
    }

    /// Report a test as skipped. Skips count as passes in the summary.
    pub fn skip(&mut self, name: &str) {
        self.tests_run += 1;
        self.tests_passed += 1;
        println!("ok {} - {} # SKIP", self.tests_run, name);
    }

    pub fn print_header(&self, planned_tests: usize) {
        println!("TAP version 14");
        println!("1..{}", planned_tests);
    }

    pub fn comment(msg: &str) {
        println!("# {}", msg);
    }

    /// Print the summary. Returns true if all tests passed.
    pub fn finish(&self) -> bool {
        println!("# Tests run: {}", self.tests_run);
        println!("# Passed: {}", self.tests_passed);
        println!("# Failed: {}", self.tests_failed);
        let passed = self.tests_failed == 0;
        println!("# Result: {}", if passed { "PASS" } else { "FAIL" });
        passed
    }

    pub fn tests_run(&self) -> usize {
        self.tests_run
    }

    pub fn tests_passed(&self) -> usize {
        self.tests_passed
    }

    pub fn tests_failed(&self) -> usize {
        self.tests_failed
    }
}

mod tap_tests {
    use super::*;
    use blufi_provisioner_macros::tap_test;

    #[tap_test]
    fn runner_counts_results() {
        let mut runner = TestRunner::new();
        runner.run("pass", || Ok(()));
        runner.run("fail", || Err("store unavailable".into()));
        runner.run_assert("panic", || panic!("bad frame"));
        assert_eq!(runner.tests_run(), 3);
        assert_eq!(runner.tests_passed(), 1);
        assert_eq!(runner.tests_failed(), 2);
    }

    #[tap_test]
    fn runner_checks_panic_message() {
        let mut runner = TestRunner::new();
        runner.run_should_panic("right", || panic!("retry budget"), Some("retry"));
        runner.run_should_panic("wrong", || panic!("scan failed"), Some("retry"));
        runner.run_should_panic("none", || {}, None);
        assert_eq!(runner.tests_passed(), 1);
        assert_eq!(runner.tests_failed(), 2);
    }

    #[tap_test]
    fn skip_counts_as_pass() {
        let mut runner = TestRunner::new();
        runner.skip("needs_second_board");
        assert_eq!(runner.tests_run(), 1);
        assert!(runner.finish());
    }

    #[tap_test]
    fn filter_selects_by_name() {
        assert!(selected(Some("runner_counts")).len() >= 1);
        assert!(selected(Some("no test has this name")).is_empty());
    }
}
