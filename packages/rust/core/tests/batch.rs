//! Batch coordinator scenarios: failure isolation, resume and rate limits.

mod common;

use std::path::{Path, PathBuf};
use std::time::Duration;

use archivist_core::batch::{checkpoint_path, load_checkpoint};
use archivist_core::{BatchOptions, BatchStatus, ItemStatus, SilentProgress, run_batch};
use archivist_shared::{CheckpointStatus, FetchFailure};

use common::{CountingGenerator, FakeFetcher, Page, article, options, temp_base};

const A: &str = "https://mp.weixin.qq.com/s/aaa";
const B: &str = "https://mp.weixin.qq.com/s/bbb";
const C: &str = "https://mp.weixin.qq.com/s/ccc";

fn batch_options(source: &Path) -> BatchOptions {
    BatchOptions {
        source: source.to_path_buf(),
        dry_run: false,
        force: false,
        reset_checkpoint: false,
        include_done: false,
        mark_done: true,
        delay: Duration::ZERO,
        rate_limit_cooldown: Duration::ZERO,
        allowed_domains: vec!["mp.weixin.qq.com".into()],
    }
}

fn write_source(base: &Path) -> PathBuf {
    let source = base.join("inbox.md");
    std::fs::write(
        &source,
        format!("# 待读\n\n- [ ] {A}?chksm=1\n- [ ] [需要登录]({B})\n- [ ] {C}\n"),
    )
    .unwrap();
    source
}

fn seeded_fetcher() -> FakeFetcher {
    let fetcher = FakeFetcher::new();
    fetcher.set(A, article("第一篇", "内容一"));
    fetcher.set(B, Page::Fail(FetchFailure::AuthRequired("login wall".into())));
    fetcher.set(C, article("第三篇", "内容三"));
    fetcher
}

#[tokio::test]
async fn one_failure_yields_partial_batch() {
    let base = temp_base("batch-e");
    let source = write_source(&base);
    let opts = options(&base);
    let fetcher = seeded_fetcher();
    let generator = CountingGenerator::new();

    let summary = run_batch(&batch_options(&source), &opts, &fetcher, &generator, &SilentProgress)
        .await
        .unwrap();

    assert_eq!(summary.found, 3);
    assert_eq!(summary.queued, 3);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.status(), BatchStatus::Partial);
    assert_eq!(summary.status().exit_code(), 2);
    assert_eq!(summary.items[1].status, ItemStatus::Failed);
    assert_eq!(summary.items[1].reason.as_deref(), Some("fetch:auth-required"));
    assert_eq!(summary.items[2].status, ItemStatus::Ingested);

    let (checkpoint, warning) = load_checkpoint(&checkpoint_path(&source)).unwrap();
    assert!(warning.is_none());
    assert_eq!(checkpoint.count(CheckpointStatus::Success), 2);
    assert_eq!(checkpoint.count(CheckpointStatus::Failed), 1);
    let failed = &checkpoint.entries[B];
    assert_eq!(failed.reason.as_deref(), Some("fetch:auth-required"));

    let content = std::fs::read_to_string(&source).unwrap();
    assert!(content.contains(&format!("- [x] {A}?chksm=1")));
    assert!(content.contains(&format!("- [ ] [需要登录]({B})")));
    assert!(content.contains(&format!("- [x] {C}")));

    let _ = std::fs::remove_dir_all(&base);
}

#[tokio::test]
async fn resume_only_retries_what_did_not_succeed() {
    let base = temp_base("batch-resume");
    let source = write_source(&base);
    let opts = options(&base);
    let fetcher = seeded_fetcher();
    let generator = CountingGenerator::new();

    let mut bopts = batch_options(&source);
    bopts.mark_done = false;
    run_batch(&bopts, &opts, &fetcher, &generator, &SilentProgress)
        .await
        .unwrap();
    assert_eq!(fetcher.calls(), 3);

    fetcher.set(B, article("第二篇", "内容二"));
    let summary = run_batch(&bopts, &opts, &fetcher, &generator, &SilentProgress)
        .await
        .unwrap();

    assert_eq!(summary.queued, 1);
    assert_eq!(summary.skipped, 2);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.status(), BatchStatus::Complete);
    assert_eq!(fetcher.calls(), 4);

    let (checkpoint, _) = load_checkpoint(&checkpoint_path(&source)).unwrap();
    assert_eq!(checkpoint.count(CheckpointStatus::Success), 3);

    // Force reprocesses checkpointed successes; content is unchanged.
    bopts.force = true;
    let summary = run_batch(&bopts, &opts, &fetcher, &generator, &SilentProgress)
        .await
        .unwrap();
    assert_eq!(summary.queued, 3);
    assert!(summary.items.iter().all(|i| i.status == ItemStatus::Updated));

    let _ = std::fs::remove_dir_all(&base);
}

#[tokio::test]
async fn unchanged_items_count_as_success() {
    let base = temp_base("batch-unchanged");
    let source = write_source(&base);
    let opts = options(&base);
    let fetcher = seeded_fetcher();
    let generator = CountingGenerator::new();

    let mut bopts = batch_options(&source);
    bopts.mark_done = false;
    bopts.reset_checkpoint = true;
    run_batch(&bopts, &opts, &fetcher, &generator, &SilentProgress)
        .await
        .unwrap();
    let summary = run_batch(&bopts, &opts, &fetcher, &generator, &SilentProgress)
        .await
        .unwrap();

    assert_eq!(summary.queued, 3);
    assert_eq!(summary.unchanged, 2);
    assert_eq!(summary.items[0].status, ItemStatus::Unchanged);
    assert_eq!(generator.calls(), 2);

    let _ = std::fs::remove_dir_all(&base);
}

#[tokio::test]
async fn done_entries_are_skipped_unless_included() {
    let base = temp_base("batch-done");
    let source = base.join("inbox.md");
    std::fs::write(&source, format!("- [x] {A}\n- [ ] {C}\n{B} (已归档)\n")).unwrap();
    let opts = options(&base);
    let fetcher = seeded_fetcher();
    fetcher.set(B, article("第二篇", "内容二"));
    let generator = CountingGenerator::new();

    let mut bopts = batch_options(&source);
    bopts.dry_run = true;
    let summary = run_batch(&bopts, &opts, &fetcher, &generator, &SilentProgress)
        .await
        .unwrap();
    assert_eq!(summary.found, 3);
    assert_eq!(summary.queued, 1);
    assert_eq!(summary.items[0].status, ItemStatus::Planned);
    assert!(summary.items[0].locator.ends_with("/s/ccc"));
    assert_eq!(fetcher.calls(), 0);
    assert!(!checkpoint_path(&source).exists());

    bopts.include_done = true;
    let summary = run_batch(&bopts, &opts, &fetcher, &generator, &SilentProgress)
        .await
        .unwrap();
    assert_eq!(summary.queued, 3);

    let _ = std::fs::remove_dir_all(&base);
}

#[tokio::test]
async fn rate_limit_is_retried_once_after_cooldown() {
    let base = temp_base("batch-rate");
    let source = base.join("inbox.md");
    std::fs::write(&source, format!("{A}\n{C}\n")).unwrap();
    let opts = options(&base);
    let generator = CountingGenerator::new();

    let fetcher = FakeFetcher::new();
    fetcher.set(A, Page::Fail(FetchFailure::RateLimited("429".into())));
    fetcher.push(A, article("第一篇", "内容一"));
    fetcher.set(C, Page::Fail(FetchFailure::RateLimited("429".into())));

    let summary = run_batch(&batch_options(&source), &opts, &fetcher, &generator, &SilentProgress)
        .await
        .unwrap();

    assert_eq!(summary.items[0].status, ItemStatus::Ingested);
    assert_eq!(summary.items[1].status, ItemStatus::Failed);
    assert_eq!(summary.items[1].reason.as_deref(), Some("fetch:rate-limited"));
    assert_eq!(fetcher.calls(), 4, "each rate-limited locator is tried exactly twice at most");

    let content = std::fs::read_to_string(&source).unwrap();
    assert!(content.starts_with(&format!("{A} (已归档)\n")));

    let _ = std::fs::remove_dir_all(&base);
}

#[tokio::test]
async fn all_failures_is_a_failed_batch() {
    let base = temp_base("batch-failed");
    let source = base.join("inbox.md");
    std::fs::write(&source, format!("{B}\n")).unwrap();
    let opts = options(&base);
    let fetcher = seeded_fetcher();
    let generator = CountingGenerator::new();

    let summary = run_batch(&batch_options(&source), &opts, &fetcher, &generator, &SilentProgress)
        .await
        .unwrap();
    assert_eq!(summary.status(), BatchStatus::Failed);
    assert_eq!(summary.status().exit_code(), 1);

    let _ = std::fs::remove_dir_all(&base);
}

#[tokio::test]
async fn missing_source_is_an_error() {
    let base = temp_base("batch-missing");
    let opts = options(&base);
    let err = run_batch(
        &batch_options(&base.join("nope.md")),
        &opts,
        &FakeFetcher::new(),
        &CountingGenerator::new(),
        &SilentProgress,
    )
    .await
    .unwrap_err();
    assert_eq!(err.reason(), "io");

    let _ = std::fs::remove_dir_all(&base);
}
