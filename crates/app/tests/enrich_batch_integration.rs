//! Integration tests for the enrich-batch use case against the in-memory driver.

use db_query_tagger_app::{EnrichBatchDeps, EnrichBatchInput, EnrichStats, enrich_batch};
use db_query_tagger_domain::{
    DatabaseType, LookupFailure, LookupPlan, Metric, MetricTags, ScalarValue,
};
use db_query_tagger_ports::LogLevel;
use db_query_tagger_shared::{RequestContext, SecretString};
use db_query_tagger_testkit::in_memory::{
    InMemorySqlDriver, RecordingLogger, RecordingTelemetry, text_row,
};
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

const QUERY: &str = "select name, site from devices where id = ?";

fn devices() -> InMemorySqlDriver {
    let mut rows = BTreeMap::new();
    rows.insert("42".to_owned(), text_row(&["sensor-a", "lab"]));
    rows.insert("7".to_owned(), text_row(&["pump", "yard"]));
    InMemorySqlDriver::keyed(DatabaseType::Sqlite, rows)
}

fn plan(remove_param_tags: bool) -> Arc<LookupPlan> {
    Arc::new(LookupPlan::new(
        QUERY,
        ["id"],
        ["device_name", "site"],
        remove_param_tags,
    ))
}

fn input(plan: Arc<LookupPlan>, metrics: Vec<Metric>) -> EnrichBatchInput<Metric> {
    EnrichBatchInput {
        plan,
        database: SecretString::from("postgres://reader:hunter2@db/inventory"),
        query_timeout: Duration::from_secs(5),
        metrics,
    }
}

struct Harness {
    deps: EnrichBatchDeps,
    logger: RecordingLogger,
    telemetry: RecordingTelemetry,
}

fn harness(driver: &InMemorySqlDriver) -> Harness {
    let logger = RecordingLogger::default();
    let telemetry = RecordingTelemetry::default();
    Harness {
        deps: EnrichBatchDeps {
            driver: Arc::new(driver.clone()),
            logger: Some(Arc::new(logger.clone())),
            telemetry: Some(Arc::new(telemetry.clone())),
        },
        logger,
        telemetry,
    }
}

fn metric(id: &str) -> Metric {
    Metric::new("temperature").with_tag("id", id)
}

#[tokio::test]
async fn found_rows_add_result_tags_and_keep_params() {
    let driver = devices();
    let h = harness(&driver);
    let ctx = RequestContext::new_run();

    let output = enrich_batch(&ctx, &h.deps, input(plan(false), vec![metric("42")])).await;

    let tagged = &output.metrics[0];
    assert_eq!(tagged.tag("id"), Some("42"));
    assert_eq!(tagged.tag("device_name"), Some("sensor-a"));
    assert_eq!(tagged.tag("site"), Some("lab"));
    assert_eq!(output.stats.found, 1);
    assert!(output.setup_error.is_none());
}

#[tokio::test]
async fn removal_flag_drops_params_only_on_match() {
    let driver = devices();
    let h = harness(&driver);
    let ctx = RequestContext::new_run();

    let output = enrich_batch(
        &ctx,
        &h.deps,
        input(plan(true), vec![metric("42"), metric("99")]),
    )
    .await;

    assert_eq!(output.metrics[0].tag("id"), None);
    assert_eq!(output.metrics[0].tag("device_name"), Some("sensor-a"));
    assert_eq!(output.metrics[1], metric("99"));
    assert_eq!(
        output.stats,
        EnrichStats {
            found: 1,
            not_found: 1,
            ..EnrichStats::default()
        }
    );
}

#[tokio::test]
async fn missing_param_tag_binds_null_and_still_queries() {
    let driver = devices();
    let h = harness(&driver);
    let ctx = RequestContext::new_run();
    let untagged = Metric::new("temperature").with_tag("host", "a");

    let output = enrich_batch(&ctx, &h.deps, input(plan(true), vec![untagged.clone()])).await;

    assert_eq!(output.metrics, vec![untagged]);
    assert_eq!(output.stats.not_found, 1);
    assert!(driver.journal().contains(&"query:NULL".to_owned()));
}

#[tokio::test]
async fn columns_map_positionally() {
    let driver = InMemorySqlDriver::new(DatabaseType::Mysql, |_| {
        Ok(Some(vec![
            ScalarValue::Integer(3),
            ScalarValue::Text("north".into()),
            ScalarValue::Null,
        ]))
    });
    let h = harness(&driver);
    let ctx = RequestContext::new_run();
    let plan = Arc::new(LookupPlan::new(
        "select rack, region, owner from assets where id = ?",
        ["id"],
        ["z_rack", "a_region", "m_owner"],
        false,
    ));

    let output = enrich_batch(&ctx, &h.deps, input(plan, vec![metric("1")])).await;

    let tagged = &output.metrics[0];
    assert_eq!(tagged.tag("z_rack"), Some("3"));
    assert_eq!(tagged.tag("a_region"), Some("north"));
    assert_eq!(tagged.tag("m_owner"), Some(""));
}

#[tokio::test]
async fn mid_batch_disconnect_fails_remaining_metrics_individually() {
    let driver = devices().with_disconnect_after(1);
    let h = harness(&driver);
    let ctx = RequestContext::new_run();
    let batch = vec![metric("42"), metric("7"), metric("42")];

    let output = enrich_batch(&ctx, &h.deps, input(plan(false), batch)).await;

    assert_eq!(output.metrics.len(), 3);
    assert_eq!(output.metrics[0].tag("device_name"), Some("sensor-a"));
    assert_eq!(output.metrics[1], metric("7"));
    assert_eq!(output.metrics[2], metric("42"));
    assert_eq!(output.stats.failed, 2);

    let failures = h.logger.events_named("tagger.lookup.failed");
    assert_eq!(failures.len(), 2);
    assert!(failures.iter().all(|event| event.level == LogLevel::Error));
    assert!(failures.iter().all(|event| {
        event
            .fields
            .as_ref()
            .and_then(|fields| fields.get("outcome"))
            .and_then(serde_json::Value::as_str)
            == Some("queryError")
    }));
    assert_eq!(h.telemetry.counter("tagger.lookup.failed"), 2);
    assert_eq!(h.telemetry.counter("tagger.lookup.found"), 1);
}

#[tokio::test]
async fn open_failure_returns_batch_unmodified() {
    let driver = devices().with_open_error(LookupFailure::Connection.error("refused"));
    let h = harness(&driver);
    let ctx = RequestContext::new_run();
    let batch = vec![metric("42"), metric("7")];

    let output = enrich_batch(&ctx, &h.deps, input(plan(true), batch.clone())).await;

    assert_eq!(output.metrics, batch);
    assert_eq!(output.stats.skipped, 2);
    assert_eq!(
        output
            .setup_error
            .as_ref()
            .and_then(LookupFailure::classify),
        Some(LookupFailure::Connection)
    );
    assert_eq!(driver.journal(), vec!["open".to_owned()]);
    assert_eq!(h.logger.events_named("tagger.batch.setup_failed").len(), 1);
    assert_eq!(h.telemetry.counter("tagger.batch.setup_failed"), 1);
}

#[tokio::test]
async fn prepare_failure_closes_the_connection() {
    let driver = devices().with_prepare_error(LookupFailure::Prepare.error("syntax"));
    let h = harness(&driver);
    let ctx = RequestContext::new_run();

    let output = enrich_batch(&ctx, &h.deps, input(plan(false), vec![metric("42")])).await;

    assert_eq!(output.metrics, vec![metric("42")]);
    assert_eq!(
        driver.journal(),
        vec![
            "open".to_owned(),
            format!("prepare:{QUERY}"),
            "close:connection".to_owned(),
        ]
    );
    let setup = h.logger.events_named("tagger.batch.setup_failed");
    let stage = setup[0]
        .fields
        .as_ref()
        .and_then(|fields| fields.get("stage"))
        .and_then(serde_json::Value::as_str);
    assert_eq!(stage, Some("prepare"));
}

#[tokio::test]
async fn statement_closes_before_connection() {
    let driver = devices();
    let h = harness(&driver);
    let ctx = RequestContext::new_run();

    enrich_batch(&ctx, &h.deps, input(plan(false), vec![metric("42"), metric("7")])).await;

    assert_eq!(
        driver.journal(),
        vec![
            "open".to_owned(),
            format!("prepare:{QUERY}"),
            "query:42".to_owned(),
            "query:7".to_owned(),
            "close:statement".to_owned(),
            "close:connection".to_owned(),
        ]
    );
}

#[tokio::test]
async fn close_failure_is_a_warning_only() {
    let driver =
        devices().with_close_statement_error(LookupFailure::Connection.error("broken pipe"));
    let h = harness(&driver);
    let ctx = RequestContext::new_run();

    let output = enrich_batch(&ctx, &h.deps, input(plan(false), vec![metric("42")])).await;

    assert_eq!(output.metrics[0].tag("device_name"), Some("sensor-a"));
    let warnings = h.logger.events_named("tagger.batch.close_failed");
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].level, LogLevel::Warn);
    assert!(driver.journal().ends_with(&["close:connection".to_owned()]));
}

#[tokio::test(start_paused = true)]
async fn slow_lookups_time_out_per_metric() {
    let driver = devices().with_query_delay(Duration::from_secs(30));
    let h = harness(&driver);
    let ctx = RequestContext::new_run();
    let mut request = input(plan(false), vec![metric("42"), metric("7")]);
    request.query_timeout = Duration::from_millis(100);

    let output = enrich_batch(&ctx, &h.deps, request).await;

    assert_eq!(output.stats.failed, 2);
    assert_eq!(output.metrics, vec![metric("42"), metric("7")]);
    let codes: Vec<String> = h
        .logger
        .events_named("tagger.lookup.failed")
        .iter()
        .filter_map(|event| event.error.as_ref())
        .filter_map(|error| error.pointer("/code/code"))
        .filter_map(serde_json::Value::as_str)
        .map(str::to_owned)
        .collect();
    assert_eq!(codes, ["timeout", "timeout"]);
}

#[tokio::test]
async fn cancellation_mid_batch_skips_the_rest() {
    let ctx = RequestContext::new_run();
    let trigger = ctx.clone();
    let driver = InMemorySqlDriver::new(DatabaseType::Sqlite, move |_| {
        trigger.cancel();
        Ok(Some(text_row(&["sensor-a", "lab"])))
    });
    let h = harness(&driver);
    let batch = vec![metric("42"), metric("7"), metric("9")];

    let output = enrich_batch(&ctx, &h.deps, input(plan(false), batch)).await;

    assert_eq!(output.metrics.len(), 3);
    assert_eq!(output.metrics[0].tag("device_name"), Some("sensor-a"));
    assert_eq!(output.metrics[1], metric("7"));
    assert_eq!(
        output.stats,
        EnrichStats {
            found: 1,
            skipped: 2,
            ..EnrichStats::default()
        }
    );
    assert_eq!(driver.query_count(), 1);
    assert_eq!(h.logger.events_named("tagger.batch.cancelled").len(), 1);
    assert!(driver.journal().ends_with(&[
        "close:statement".to_owned(),
        "close:connection".to_owned()
    ]));
}

#[tokio::test]
async fn empty_result_tags_report_width_mismatch() {
    let driver = devices();
    let h = harness(&driver);
    let ctx = RequestContext::new_run();
    let plan = Arc::new(LookupPlan::new(QUERY, ["id"], Vec::<String>::new(), true));

    let output = enrich_batch(&ctx, &h.deps, input(plan, vec![metric("42"), metric("99")])).await;

    assert_eq!(output.metrics, vec![metric("42"), metric("99")]);
    assert_eq!(output.stats.failed, 1);
    assert_eq!(output.stats.not_found, 1);
}

#[tokio::test]
async fn logs_carry_correlation_but_never_the_connection_string() {
    let driver = devices().with_open_error(LookupFailure::Connection.error("refused"));
    let h = harness(&driver);
    let ctx = RequestContext::new_run();

    enrich_batch(&ctx, &h.deps, input(plan(false), vec![metric("42")])).await;

    let events = h.logger.events();
    assert!(!events.is_empty());
    for event in &events {
        let fields = event.fields.clone().unwrap_or_default();
        assert_eq!(
            fields.get("correlationId").and_then(serde_json::Value::as_str),
            Some(ctx.correlation_id().as_str())
        );
        assert_eq!(
            fields.get("databaseType").and_then(serde_json::Value::as_str),
            Some("sqlite3")
        );
        let rendered = format!("{event:?}");
        assert!(!rendered.contains("hunter2"), "leaked secret: {rendered}");
    }
    assert_eq!(h.logger.count_at(LogLevel::Debug), 1);
    assert_eq!(h.telemetry.timer_samples("tagger.batch.duration"), 1);
}

#[tokio::test]
async fn runs_without_logger_or_telemetry() {
    let driver = devices();
    let deps = EnrichBatchDeps {
        driver: Arc::new(driver.clone()),
        logger: None,
        telemetry: None,
    };
    let ctx = RequestContext::new_run();

    let output = enrich_batch(&ctx, &deps, input(plan(false), vec![metric("7")])).await;

    assert_eq!(output.metrics[0].tag("device_name"), Some("pump"));
}

proptest! {
    #[test]
    fn batches_keep_length_order_and_accounting(
        ids in proptest::collection::vec(prop_oneof![Just("42"), Just("7"), Just("99"), Just("")], 0..24),
        disconnect_after in proptest::option::of(0usize..24),
        remove in any::<bool>(),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|error| TestCaseError::fail(error.to_string()))?;
        let driver = match disconnect_after {
            Some(limit) => devices().with_disconnect_after(limit),
            None => devices(),
        };
        let h = harness(&driver);
        let batch: Vec<Metric> = ids
            .iter()
            .enumerate()
            .map(|(index, id)| {
                let metric = Metric::new(format!("m{index}"));
                if id.is_empty() { metric } else { metric.with_tag("id", *id) }
            })
            .collect();

        let output = runtime.block_on(async {
            let ctx = RequestContext::new_run();
            enrich_batch(&ctx, &h.deps, input(plan(remove), batch.clone())).await
        });

        prop_assert_eq!(output.metrics.len(), batch.len());
        prop_assert_eq!(output.stats.total(), batch.len());
        for (before, after) in batch.iter().zip(&output.metrics) {
            prop_assert_eq!(&before.name, &after.name);
            if after.tag("device_name").is_none() {
                prop_assert_eq!(before, after);
            }
        }
    }
}
