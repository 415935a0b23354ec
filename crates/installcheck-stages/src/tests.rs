use super::*;
use std::fs;
use std::process::Command;
use std::thread;
use std::time::Duration;

use installcheck_core::{
    run_stages, ActiveChild, CheckStatus, NoHooks, RunOptions, SmokeConfig, StageStatus,
    StageVerdict,
};
use installcheck_snapshot::CleanupFinalizer;

use crate::components::{contains_entry_with_prefix, list_model_files};
use crate::install::{missing_config_keys, present_artifacts};
use crate::test_support::{test_root, write_executable, Product, COMPLETE_CONFIG};

fn messages(verdict: &StageVerdict, status: CheckStatus) -> Vec<String> {
    verdict
        .checks()
        .iter()
        .filter(|check| check.status == status)
        .map(|check| check.message.clone())
        .collect()
}

#[test]
fn plan_for_selects_quick_or_full_stage_list() {
    let names = |plan: Vec<Box<dyn Stage>>| {
        plan.iter()
            .map(|stage| (stage.name().to_string(), stage.mutates_install()))
            .collect::<Vec<_>>()
    };

    let full = names(plan_for(&RunOptions::default()));
    assert_eq!(
        full,
        vec![
            ("Prerequisites Check".to_string(), false),
            ("Fresh Installation".to_string(), true),
            ("Component Verification".to_string(), false),
            ("CLI Smoke Test".to_string(), false),
            ("Reinstallation".to_string(), true),
            ("Uninstallation".to_string(), true),
        ]
    );

    let quick = names(plan_for(&RunOptions {
        quick: true,
        ..RunOptions::default()
    }));
    assert_eq!(
        quick,
        vec![
            ("Prerequisites Check".to_string(), false),
            ("CLI Smoke Test".to_string(), false),
        ]
    );
}

#[cfg(unix)]
#[test]
fn full_lifecycle_passes_against_well_behaved_installer() {
    let product = Product::new();
    let mut ctx = product.context(RunOptions::default());

    let passed = run_stages(&mut ctx, &full_plan(), &mut NoHooks).expect("run must complete");

    let report = ctx.report();
    assert!(passed, "unexpected failures: {:?}", report.failed_checks());
    assert_eq!(report.stages().len(), 6);
    assert!(report
        .stages()
        .iter()
        .all(|stage| stage.status == StageStatus::Passed));
    for log in ["install.log", "reinstall.log", "uninstall.log"] {
        assert!(ctx.log_path(log).is_file(), "missing captured log {log}");
    }
    assert!(!product.install_root.exists());
    assert!(!product.entry_point.exists());
}

#[cfg(unix)]
#[test]
fn full_plan_stops_at_old_runtime_without_touching_the_machine() {
    let product = Product::new();
    product.set_runtime_banner("Python 3.6.9");
    let mut ctx = product.context(RunOptions::default());

    let passed = run_stages(&mut ctx, &full_plan(), &mut NoHooks).expect("run must complete");

    let report = ctx.report();
    assert!(!passed);
    assert_eq!(report.failed_stages(), vec!["Prerequisites Check"]);
    assert_eq!(
        report.skipped_stages(),
        vec![
            "Fresh Installation",
            "Component Verification",
            "CLI Smoke Test",
            "Reinstallation",
            "Uninstallation",
        ]
    );
    assert!(report.stages()[1..]
        .iter()
        .all(|stage| stage.checks.is_empty()));
    assert!(!product.install_root.exists());
    assert!(!product.entry_point.exists());
    assert!(!product.installer_args_file().exists(), "installer must not run");
}

#[cfg(unix)]
#[test]
fn prerequisites_pass_with_supported_runtime() {
    let product = Product::new();
    let ctx = product.context(RunOptions::default());

    let verdict = PrerequisiteStage.run(&ctx).expect("stage must run");

    assert!(verdict.passed(), "{verdict:?}");
    let passes = messages(&verdict, CheckStatus::Pass);
    assert!(passes.iter().any(|msg| msg.contains("3.11.4 >= 3.8.0")));
    assert!(passes.iter().any(|msg| msg.starts_with("sh is installed")));
    assert!(passes.contains(&"pyproject.toml exists".to_string()));
}

#[cfg(unix)]
#[test]
fn prerequisites_reject_old_runtime_before_other_checks() {
    let product = Product::new();
    product.set_runtime_banner("Python 3.6.9");
    let ctx = product.context(RunOptions::default());

    let verdict = PrerequisiteStage.run(&ctx).expect("stage must run");

    assert!(!verdict.passed());
    assert_eq!(verdict.checks().len(), 1);
    assert!(verdict.checks()[0].message.contains("3.6.9 < 3.8.0"));
}

#[cfg(unix)]
#[test]
fn prerequisites_fail_when_dependency_manager_missing() {
    let product = Product::new();
    let mut config = product.config();
    config.dependency_manager = "installcheck-no-such-tool".to_string();
    let ctx = product.context_with(config, RunOptions::default());

    let verdict = PrerequisiteStage.run(&ctx).expect("stage must run");

    assert_eq!(
        messages(&verdict, CheckStatus::Fail),
        vec!["installcheck-no-such-tool not found".to_string()]
    );
    assert!(!messages(&verdict, CheckStatus::Pass)
        .iter()
        .any(|msg| msg.contains("exists")));
}

#[cfg(unix)]
#[test]
fn prerequisites_fail_on_missing_installer_artifact() {
    let product = Product::new();
    fs::remove_file(product.workdir.join("pyproject.toml")).expect("must remove artifact");
    let ctx = product.context(RunOptions::default());

    let verdict = PrerequisiteStage.run(&ctx).expect("stage must run");

    let failures = messages(&verdict, CheckStatus::Fail);
    assert_eq!(failures.len(), 1);
    assert!(failures[0].starts_with("pyproject.toml not found"));
}

#[cfg(unix)]
#[test]
fn prerequisites_report_unstartable_runtime() {
    let product = Product::new();
    let mut config = product.config();
    config.runtime.program = product.root.join("missing-python").display().to_string();
    let ctx = product.context_with(config, RunOptions::default());

    let verdict = PrerequisiteStage.run(&ctx).expect("stage must run");

    assert!(!verdict.passed());
    assert!(verdict.checks()[0].message.contains("not found"));
}

#[cfg(unix)]
#[test]
fn fresh_install_verifies_layout_and_config() {
    let product = Product::new();
    let ctx = product.context(RunOptions::default());

    let verdict = FreshInstallStage.run(&ctx).expect("stage must run");

    assert!(verdict.passed(), "{verdict:?}");
    let passes = messages(&verdict, CheckStatus::Pass);
    assert_eq!(passes.first().map(String::as_str), Some("Installation completed"));
    assert!(passes.contains(&"Executable wrapper created".to_string()));
    assert_eq!(passes.last().map(String::as_str), Some("Configuration properly saved"));
    let log = fs::read_to_string(ctx.log_path("install.log")).expect("must read log");
    assert!(log.contains("installed"));
}

#[cfg(unix)]
#[test]
fn fresh_install_failure_attaches_log_excerpt() {
    let product = Product::new();
    product.set_installer("echo 'resolving torch'\necho 'network unreachable' >&2\nexit 3\n");
    let ctx = product.context(RunOptions::default());

    let verdict = FreshInstallStage.run(&ctx).expect("stage must run");

    let failures = messages(&verdict, CheckStatus::Fail);
    assert_eq!(failures.len(), 1);
    assert!(failures[0].starts_with("Installation failed (exit code 3)"));
    let excerpt = verdict.log().expect("log excerpt must be attached");
    assert_eq!(excerpt.path, ctx.log_path("install.log"));
    assert!(excerpt.text.contains("network unreachable"));
}

#[cfg(unix)]
#[test]
fn fresh_install_stops_at_first_missing_artifact() {
    let product = Product::new();
    product.set_installer(&format!("mkdir -p \"{}\"\n", product.install_root.display()));
    let ctx = product.context(RunOptions::default());

    let verdict = FreshInstallStage.run(&ctx).expect("stage must run");

    let failures = messages(&verdict, CheckStatus::Fail);
    assert_eq!(failures.len(), 1);
    assert!(failures[0].starts_with("Virtual environment not found at"));
}

#[cfg(unix)]
#[test]
fn fresh_install_flags_incomplete_configuration() {
    let product = Product::new();
    product.set_installer(&product.installer_body(r#"{"version": "1.0.0"}"#, 3));
    let ctx = product.context(RunOptions::default());

    let verdict = FreshInstallStage.run(&ctx).expect("stage must run");

    assert_eq!(
        messages(&verdict, CheckStatus::Fail),
        vec!["Configuration incomplete (missing python_version)".to_string()]
    );
}

#[cfg(unix)]
#[test]
fn fresh_install_forwards_dev_flag() {
    let product = Product::new();
    let ctx = product.context(RunOptions {
        dev: true,
        ..RunOptions::default()
    });

    FreshInstallStage.run(&ctx).expect("stage must run");

    let args = fs::read_to_string(product.installer_args_file()).expect("must read args");
    assert_eq!(args.trim(), "--dev");
}

#[cfg(unix)]
#[test]
fn clean_mode_removes_existing_installation_first() {
    let product = Product::new();
    fs::create_dir_all(&product.install_root).expect("must create install root");
    let stale = product.install_root.join("stale.txt");
    fs::write(&stale, "left over").expect("must write stale file");
    let ctx = product.context(RunOptions {
        clean: true,
        ..RunOptions::default()
    });

    let verdict = FreshInstallStage.run(&ctx).expect("stage must run");

    assert!(verdict.passed(), "{verdict:?}");
    assert!(!stale.exists());
    assert!(messages(&verdict, CheckStatus::Info)
        .iter()
        .any(|msg| msg.starts_with("Removed existing")));
}

#[cfg(unix)]
#[test]
fn component_stage_reports_every_sub_check() {
    let product = Product::new();
    product.set_installer(&product.installer_body(COMPLETE_CONFIG, 2));
    product.install();
    fs::remove_file(product.install_root.join("RIFE").join("inference_img.py"))
        .expect("must remove key file");
    let ctx = product.context(RunOptions::default());

    let verdict = ComponentStage.run(&ctx).expect("stage must run");

    assert!(!verdict.passed());
    assert!(messages(&verdict, CheckStatus::Pass).contains(&"PyTorch installed".to_string()));
    assert_eq!(
        messages(&verdict, CheckStatus::Warn),
        vec!["RIFE inference_img.py not found".to_string()]
    );
    assert_eq!(
        messages(&verdict, CheckStatus::Fail),
        vec!["Incomplete models (2 files, expected at least 3)".to_string()]
    );
}

#[cfg(unix)]
#[test]
fn component_stage_fails_packages_that_do_not_import() {
    let product = Product::new();
    product.install();
    write_executable(
        &product.install_root.join("venv").join("bin").join("python"),
        "case \"$2\" in\n  \"import torch\") exit 1 ;;\nesac\nexit 0\n",
    );
    let ctx = product.context(RunOptions::default());

    let verdict = ComponentStage.run(&ctx).expect("stage must run");

    assert_eq!(
        messages(&verdict, CheckStatus::Fail),
        vec!["PyTorch not found".to_string()]
    );
    assert!(messages(&verdict, CheckStatus::Pass)
        .contains(&"AI models present (3 files)".to_string()));
}

#[cfg(unix)]
#[test]
fn smoke_test_accepts_help_output() {
    let product = Product::new();
    product.set_entry_point("echo \"UFPS - Ultra FPS video interpolation\"\n");
    let ctx = product.context(RunOptions::default());

    let verdict = SmokeStage.run(&ctx).expect("stage must run");

    assert_eq!(
        messages(&verdict, CheckStatus::Pass),
        vec!["Help output works".to_string()]
    );
    assert!(messages(&verdict, CheckStatus::Warn).is_empty());
}

#[cfg(unix)]
#[test]
fn smoke_test_falls_back_to_interactive_fallback() {
    let product = Product::new();
    product.set_entry_point(concat!(
        "if [ \"$1\" = \"--help\" ]; then echo \"usage: wrapper\"; exit 0; fi\n",
        "read choice\n",
        "echo \"Welcome to Ultra FPS\"\n",
    ));
    let ctx = product.context(RunOptions {
        verbose: true,
        ..RunOptions::default()
    });

    let verdict = SmokeStage.run(&ctx).expect("stage must run");

    assert!(verdict.passed(), "{verdict:?}");
    assert_eq!(
        messages(&verdict, CheckStatus::Warn),
        vec!["Help output - unclear output".to_string()]
    );
    assert_eq!(
        messages(&verdict, CheckStatus::Info),
        vec!["Output: usage: wrapper".to_string()]
    );
    assert_eq!(
        messages(&verdict, CheckStatus::Pass),
        vec!["Interactive mode works".to_string()]
    );
}

#[cfg(unix)]
#[test]
fn smoke_help_marker_is_case_sensitive() {
    let attempts = smoke_attempts(&SmokeConfig::default());
    assert!(!attempts[0].matches("ufps help"));
    assert!(attempts[0].matches("UFPS help"));
    assert!(attempts[1].matches("ULTRA FPS"));
    assert!(!attempts[1].matches("something else"));
}

#[cfg(unix)]
#[test]
fn smoke_test_fails_when_every_attempt_times_out() {
    let product = Product::new();
    product.set_entry_point("exec sleep 30\n");
    let mut config = product.config();
    config.smoke.timeout_secs = 1;
    let ctx = product.context_with(config, RunOptions::default());

    let verdict = SmokeStage.run(&ctx).expect("stage must run");

    assert_eq!(
        messages(&verdict, CheckStatus::Warn),
        vec![
            "Help output timed out after 1s".to_string(),
            "Interactive mode timed out after 1s".to_string(),
        ]
    );
    let failures = messages(&verdict, CheckStatus::Fail);
    assert_eq!(failures.len(), 1);
    assert!(failures[0].starts_with("CLI not recognised"));
    assert!(failures[0].contains("timed out"));
}

#[cfg(unix)]
#[test]
fn smoke_test_fails_without_entry_point() {
    let product = Product::new();
    let ctx = product.context(RunOptions::default());

    let verdict = SmokeStage.run(&ctx).expect("stage must run");

    let failures = messages(&verdict, CheckStatus::Fail);
    assert_eq!(failures.len(), 1);
    assert!(failures[0].starts_with("Executable not found at"));
}

#[cfg(unix)]
#[test]
fn reinstall_over_existing_installation_keeps_every_artifact() {
    let product = Product::new();
    product.install();
    let ctx = product.context(RunOptions::default());
    let before = present_artifacts(&ctx.layout);
    let config_before =
        fs::read_to_string(ctx.layout.config_file_path()).expect("must read config");

    let verdict = ReinstallStage.run(&ctx).expect("stage must run");

    assert!(verdict.passed(), "{verdict:?}");
    assert_eq!(before.len(), 7);
    assert_eq!(present_artifacts(&ctx.layout), before);
    assert_eq!(
        messages(&verdict, CheckStatus::Pass),
        vec![
            "Reinstallation completed".to_string(),
            "Configuration maintained".to_string(),
            "Installation intact after reinstall".to_string(),
            "Reinstall preserved all 7 artifacts".to_string(),
        ]
    );
    assert_eq!(
        fs::read_to_string(ctx.layout.config_file_path()).expect("must read config"),
        config_before
    );
    assert!(ctx.log_path("reinstall.log").is_file());
}

#[cfg(unix)]
#[test]
fn reinstall_detects_removed_artifacts() {
    let product = Product::new();
    product.install();
    let reinstall = format!(
        "{}rm -rf \"{}/models\"\n",
        product.installer_body(COMPLETE_CONFIG, 3),
        product.install_root.display()
    );
    product.set_installer(&reinstall);
    let ctx = product.context(RunOptions::default());

    let verdict = ReinstallStage.run(&ctx).expect("stage must run");

    let failures = messages(&verdict, CheckStatus::Fail);
    assert_eq!(failures.len(), 1);
    assert!(failures[0].starts_with("Reinstall removed"));
    assert!(failures[0].contains("models"));
    assert!(messages(&verdict, CheckStatus::Pass)
        .contains(&"Installation intact after reinstall".to_string()));
}

#[cfg(unix)]
#[test]
fn uninstall_confirms_prompt_and_verifies_removal() {
    let product = Product::new();
    product.install();
    let ctx = product.context(RunOptions::default());

    let verdict = UninstallStage.run(&ctx).expect("stage must run");

    assert_eq!(
        messages(&verdict, CheckStatus::Pass),
        vec![
            "Uninstallation completed".to_string(),
            "Installation directory removed".to_string(),
            "Executable removed".to_string(),
        ]
    );
}

#[cfg(unix)]
#[test]
fn uninstall_on_clean_system_passes() {
    let product = Product::new();
    let ctx = product.context(RunOptions::default());

    let verdict = UninstallStage.run(&ctx).expect("stage must run");

    assert!(verdict.passed(), "{verdict:?}");
    assert!(messages(&verdict, CheckStatus::Fail).is_empty());
    assert!(messages(&verdict, CheckStatus::Pass).contains(&"Executable removed".to_string()));
    assert!(!product.install_root.exists());
}

#[cfg(unix)]
#[test]
fn uninstall_reports_leftovers() {
    let product = Product::new();
    product.install();
    product.set_uninstaller(&format!("rm -f \"{}\"\n", product.entry_point.display()));
    let ctx = product.context(RunOptions::default());

    let verdict = UninstallStage.run(&ctx).expect("stage must run");

    let failures = messages(&verdict, CheckStatus::Fail);
    assert_eq!(failures.len(), 1);
    assert!(failures[0].starts_with("Installation directory still exists"));
    assert!(messages(&verdict, CheckStatus::Pass).contains(&"Executable removed".to_string()));
}

#[cfg(unix)]
#[test]
fn run_captured_kills_child_after_timeout() {
    let mut cmd = Command::new("/bin/sh");
    cmd.arg("-c").arg("exec sleep 30");

    let run = run_captured(cmd, None, Duration::from_millis(200)).expect("must spawn");

    assert!(run.timed_out());
    assert!(!run.success());
    assert_eq!(run.describe_exit(), "timed out");
}

#[cfg(unix)]
#[test]
fn run_captured_feeds_stdin_and_separates_streams() {
    let mut cmd = Command::new("/bin/sh");
    cmd.arg("-c").arg("read line; echo \"got $line\"; echo oops >&2; exit 4");

    let run = run_captured(cmd, Some(b"y\n"), Duration::from_secs(10)).expect("must spawn");

    assert_eq!(run.stdout, "got y\n");
    assert_eq!(run.stderr, "oops\n");
    assert_eq!(run.describe_exit(), "exit code 4");
    assert_eq!(run.combined_output(), "got y\noops\n");
}

#[cfg(unix)]
#[test]
fn run_tracked_returns_when_cleanup_stops_the_child() {
    let active = ActiveChild::default();
    let mut cmd = Command::new("/bin/sh");
    cmd.arg("-c").arg("exec sleep 30");

    let run = thread::scope(|scope| {
        let waiter = scope.spawn(|| run_tracked(cmd, None, Duration::from_secs(60), &active));
        thread::sleep(Duration::from_millis(300));
        assert!(active.terminate(), "child must still be attached");
        waiter.join().expect("waiter thread")
    })
    .expect("must spawn");

    assert!(run.status.is_none());
    assert!(!run.success());
}

#[test]
fn run_tracked_refuses_to_launch_after_cleanup() {
    let active = ActiveChild::default();
    active.terminate();

    let err = run_tracked(Command::new("/bin/sh"), None, Duration::from_secs(1), &active)
        .expect_err("closed handle must refuse");

    assert!(err.to_string().contains("cleanup already ran"));
}

#[cfg(unix)]
#[test]
fn cleanup_during_install_stops_installer_before_restoring_original() {
    let product = Product::new();
    fs::create_dir_all(&product.install_root).expect("must create install root");
    fs::write(product.install_root.join("original.txt"), "keep me").expect("must seed original");
    product.set_installer(&format!(
        "sleep 2\nrm -rf \"{0}\"\nmkdir -p \"{0}\"\necho late > \"{0}/late.txt\"\n",
        product.install_root.display()
    ));
    let ctx = product.context(RunOptions::default());
    let finalizer = CleanupFinalizer::new(ctx.scratch_dir(), false)
        .with_active_child(ctx.active_child().clone());
    finalizer
        .take_snapshot(&ctx.layout.tracked_paths())
        .expect("snapshot must succeed");

    let (outcome, verdict) = thread::scope(|scope| {
        let install = scope.spawn(|| FreshInstallStage.run(&ctx));
        thread::sleep(Duration::from_millis(500));
        let outcome = finalizer.run().expect("cleanup must run");
        let verdict = install
            .join()
            .expect("install thread")
            .expect("stage must run");
        (outcome, verdict)
    });
    thread::sleep(Duration::from_millis(2500));

    assert!(outcome.stopped_child);
    assert!(!verdict.passed());
    assert_eq!(
        fs::read_to_string(product.install_root.join("original.txt")).expect("original survives"),
        "keep me"
    );
    assert!(!product.install_root.join("late.txt").exists());
}

#[test]
fn run_captured_errors_when_program_is_missing() {
    let root = test_root("stages");
    let cmd = Command::new(root.join("does-not-exist"));

    let err = run_captured(cmd, None, Duration::from_secs(1)).expect_err("must fail to spawn");

    assert!(err.to_string().contains("failed to launch"));
    let _ = fs::remove_dir_all(root);
}

#[test]
fn write_run_log_records_command_and_streams() {
    let root = test_root("stages");
    let path = root.join("logs").join("install.log");
    let run = CapturedRun {
        status: None,
        stdout: "partial output".to_string(),
        stderr: String::new(),
    };

    write_run_log(&path, "python3 install.py", &run).expect("must write log");

    let body = fs::read_to_string(&path).expect("must read log");
    assert!(body.starts_with("$ python3 install.py\n[timed out]\n"));
    assert!(body.contains("partial output"));
    let _ = fs::remove_dir_all(root);
}

#[test]
fn tail_lines_keeps_last_lines() {
    assert_eq!(tail_lines("a\nb\nc\nd", 2), "c\nd");
    assert_eq!(tail_lines("only", 5), "only");
    assert_eq!(tail_lines("", 3), "");
}

#[cfg(unix)]
#[test]
fn find_on_path_requires_executable_file() {
    let root = test_root("stages");
    write_executable(&root.join("tool"), "exit 0\n");
    fs::write(root.join("plain"), "data").expect("must write plain file");
    fs::create_dir_all(root.join("folder")).expect("must create folder");
    let path_var = std::env::join_paths([root.join("missing"), root.clone()])
        .expect("must join paths");

    assert_eq!(
        find_on_path("tool", Some(&path_var)),
        Some(root.join("tool"))
    );
    assert_eq!(find_on_path("plain", Some(&path_var)), None);
    assert_eq!(find_on_path("folder", Some(&path_var)), None);
    assert_eq!(find_on_path("tool", None), None);
    let direct = root.join("tool").display().to_string();
    assert_eq!(find_on_path(&direct, None), Some(root.join("tool")));
    let _ = fs::remove_dir_all(root);
}

#[test]
fn list_model_files_filters_by_extension_and_sorts() {
    let root = test_root("stages");
    fs::write(root.join("b.pkl"), vec![0_u8; 10]).expect("must write model");
    fs::write(root.join("a.pkl"), vec![0_u8; 20]).expect("must write model");
    fs::write(root.join("notes.txt"), "x").expect("must write notes");
    fs::create_dir_all(root.join("dir.pkl")).expect("must create dir");

    let models = list_model_files(&root, "pkl").expect("must list");

    assert_eq!(
        models,
        vec![(root.join("a.pkl"), 20), (root.join("b.pkl"), 10)]
    );
    let _ = fs::remove_dir_all(root);
}

#[test]
fn prefix_search_descends_into_subdirectories() {
    let root = test_root("stages");
    let nested = root.join("train").join("model");
    fs::create_dir_all(&nested).expect("must create nested dir");
    fs::write(nested.join("IFNet_HDv3.py"), "").expect("must write file");

    assert!(contains_entry_with_prefix(&root, "IFNet").expect("must scan"));
    assert!(contains_entry_with_prefix(&root, "model").expect("must scan"));
    assert!(!contains_entry_with_prefix(&root, "inference").expect("must scan"));
    let _ = fs::remove_dir_all(root);
}

#[test]
fn config_keys_are_checked_by_presence() {
    assert!(missing_config_keys(COMPLETE_CONFIG)
        .expect("must parse")
        .is_empty());
    assert_eq!(
        missing_config_keys(r#"{"python_version": null}"#).expect("must parse"),
        vec!["version"]
    );
    assert!(missing_config_keys("not json").is_err());
}
