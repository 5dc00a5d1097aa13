use farm_reactor::{OverflowPolicy, ReactorBuilder, SignalKind};

use std::env;
use std::os::unix::process::ExitStatusExt;
use std::process::Command;

const CHILD_ENV: &str = "FARM_REACTOR_OVERFLOW_CHILD";

/// Runs inside the re-executed test binary.
fn overflow_in_child() -> ! {
    let _reactor = ReactorBuilder::new()
        .signals([SignalKind::User1])
        .signal_pool_capacity(1)
        .overflow_policy(OverflowPolicy::Abort)
        .build()
        .unwrap();

    unsafe {
        libc::raise(libc::SIGUSR1);
        libc::raise(libc::SIGUSR1);
    }

    // Reaching this point means the pool accepted a second signal.
    std::process::exit(0);
}

#[test]
fn test_exhausted_pool_aborts() {
    if env::var_os(CHILD_ENV).is_some() {
        overflow_in_child();
    }

    let output = Command::new(env::current_exe().unwrap())
        .args(["--exact", "test_exhausted_pool_aborts", "--nocapture", "--test-threads=1"])
        .env(CHILD_ENV, "1")
        .output()
        .unwrap();

    assert_eq!(
        output.status.signal(),
        Some(libc::SIGABRT),
        "child should abort, got {:?}",
        output.status
    );

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("signal pool exhausted"), "stderr: {stderr}");
}
