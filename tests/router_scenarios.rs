//! Router and planner scenarios
//!
//! Each test drives the public API with in-process candidates; no network.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nil_client::{execute_with_fallback, ErrorClass, RouterError, RouterOptions, TransportCandidate, TransportError};
use nil_core::{
    blob_index_for_raw_offset, plan_chunks, raw_capacity_per_mdu, BackendKind, ChunkPlanRequest, RoutePreference,
    TransportOp,
};

fn counted<T: Clone + Send + Sync + 'static>(
    backend: BackendKind,
    result: Result<T, TransportError>,
    calls: Arc<AtomicUsize>,
) -> TransportCandidate<'static, T> {
    TransportCandidate::new(backend, backend.as_str(), move || {
        let result = result.clone();
        let calls = calls.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            result
        }
    })
}

#[tokio::test]
async fn test_connection_refused_fails_over_to_direct_sp() {
    let gw_calls = Arc::new(AtomicUsize::new(0));
    let sp_calls = Arc::new(AtomicUsize::new(0));
    let candidates = vec![
        counted(
            BackendKind::Gateway,
            Err(TransportError::new(ErrorClass::ConnectionRefused, "connection refused")),
            gw_calls.clone(),
        ),
        counted(BackendKind::DirectSp, Ok("ok".to_string()), sp_calls.clone()),
    ];

    let outcome = execute_with_fallback(TransportOp::Fetch, candidates, &RouterOptions::new(RoutePreference::Auto))
        .await
        .unwrap();

    assert_eq!(outcome.backend, BackendKind::DirectSp);
    assert_eq!(outcome.data, "ok");
    assert_eq!(outcome.trace.attempts.len(), 2);
    assert!(!outcome.trace.attempts[0].ok);
    assert_eq!(outcome.trace.attempts[0].error_class, Some(ErrorClass::ConnectionRefused));
    assert!(outcome.trace.attempts[1].ok);
    assert_eq!(gw_calls.load(Ordering::SeqCst), 1);
    assert_eq!(sp_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_http_4xx_is_not_retried_on_same_backend() {
    let gw_calls = Arc::new(AtomicUsize::new(0));
    let candidates = vec![
        counted(
            BackendKind::Gateway,
            Err(TransportError::http(404, "not found")),
            gw_calls.clone(),
        ),
        counted(BackendKind::DirectSp, Ok(7u32), Arc::new(AtomicUsize::new(0))),
    ];
    let opts = RouterOptions::new(RoutePreference::Auto).with_max_attempts_per_backend(3);

    let outcome = execute_with_fallback(TransportOp::Fetch, candidates, &opts).await.unwrap();

    assert_eq!(gw_calls.load(Ordering::SeqCst), 1);
    assert_eq!(outcome.data, 7);
    assert_eq!(outcome.trace.attempts[0].status, Some(404));
    assert_eq!(outcome.trace.attempts[0].error_class, Some(ErrorClass::Http4xx));
}

#[tokio::test]
async fn test_provider_mismatch_is_terminal() {
    let sp_calls = Arc::new(AtomicUsize::new(0));
    let candidates = vec![
        counted::<String>(
            BackendKind::Gateway,
            Err(TransportError::provider_mismatch("sp-a", "sp-b")),
            Arc::new(AtomicUsize::new(0)),
        ),
        counted(BackendKind::DirectSp, Ok("never".to_string()), sp_calls.clone()),
    ];

    let err = execute_with_fallback(TransportOp::Fetch, candidates, &RouterOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, RouterError::Terminal { .. }));
    assert_eq!(err.last_error().map(|e| e.class), Some(ErrorClass::ProviderMismatch));
    assert_eq!(err.trace().attempts.len(), 1);
    assert!(err.trace().chosen.is_none());
    assert_eq!(sp_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_invalid_response_is_terminal() {
    let candidates = vec![counted::<()>(
        BackendKind::PeerOverlay,
        Err(TransportError::invalid_response("response is missing X-Nil-Provider")),
        Arc::new(AtomicUsize::new(0)),
    )];
    let opts = RouterOptions::default().with_max_attempts_per_backend(5);

    let err = execute_with_fallback(TransportOp::Fetch, candidates, &opts)
        .await
        .unwrap_err();

    assert!(err.is_terminal());
    assert_eq!(err.trace().attempts.len(), 1);
}

#[tokio::test]
async fn test_hanging_candidate_times_out_and_fails_over() {
    let candidates = vec![
        TransportCandidate::new(BackendKind::Gateway, "gw", || async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok("late")
        }),
        TransportCandidate::new(BackendKind::DirectSp, "sp", || async { Ok("fast") }),
    ];
    let opts = RouterOptions::default().with_timeout(Duration::from_millis(50));

    let outcome = execute_with_fallback(TransportOp::Fetch, candidates, &opts).await.unwrap();

    assert_eq!(outcome.backend, BackendKind::DirectSp);
    assert_eq!(outcome.data, "fast");
    assert_eq!(outcome.trace.attempts[0].error_class, Some(ErrorClass::Timeout));
    assert!(outcome.trace.attempts[0].elapsed_ms < 30_000);
}

#[tokio::test]
async fn test_exhausted_error_carries_full_trace() {
    let candidates = vec![
        counted::<()>(
            BackendKind::Gateway,
            Err(TransportError::http(502, "bad gateway")),
            Arc::new(AtomicUsize::new(0)),
        ),
        counted::<()>(
            BackendKind::DirectSp,
            Err(TransportError::from_message("something odd")),
            Arc::new(AtomicUsize::new(0)),
        ),
    ];
    let opts = RouterOptions::new(RoutePreference::PreferDirectSp).with_max_attempts_per_backend(2);

    let err = execute_with_fallback(TransportOp::Plan, candidates, &opts)
        .await
        .unwrap_err();

    let trace = err.trace();
    let backends: Vec<_> = trace.attempts.iter().map(|a| a.backend).collect();
    // direct_sp first (unknown: no retry), then gateway twice (5xx: retried)
    assert_eq!(
        backends,
        vec![BackendKind::DirectSp, BackendKind::Gateway, BackendKind::Gateway]
    );
    assert_eq!(trace.op, TransportOp::Plan);
    assert!(err.to_string().contains("All plan attempts failed"));
}

#[test]
fn test_planner_scenario_400000_bytes() {
    let chunks = plan_chunks(&ChunkPlanRequest {
        file_start_offset: 12345,
        file_size: 1_048_576,
        range_start: 0,
        range_len: 400_000,
        mdu_size: 8_388_608,
        blob_size: 131_072,
    })
    .unwrap();

    assert!(chunks.len() > 1);
    assert!(chunks.iter().all(|c| c.range_len > 0 && c.range_len <= 131_072));
    assert_eq!(chunks.iter().map(|c| c.range_len).sum::<u64>(), 400_000);
}

#[test]
fn test_planner_chunks_stay_inside_one_blob() {
    let mdu_size = 8_388_608;
    let blob_size = 131_072;
    let capacity = raw_capacity_per_mdu(mdu_size);

    for (file_start_offset, file_size, range_start, range_len) in [
        (0u64, 5_000_000u64, 0u64, 5_000_000u64),
        (capacity - 1000, 3_000_000, 500, 2_000_000),
        (77, 900_000, 899_999, 10),
        (4_096, 20_000_000, 1_000_000, u64::MAX),
    ] {
        let chunks = plan_chunks(&ChunkPlanRequest {
            file_start_offset,
            file_size,
            range_start,
            range_len,
            mdu_size,
            blob_size,
        })
        .unwrap();

        let expected = range_len.min(file_size - range_start);
        assert_eq!(chunks.iter().map(|c| c.range_len).sum::<u64>(), expected);

        let mut cursor = range_start;
        for chunk in &chunks {
            assert_eq!(chunk.range_start, cursor);
            cursor += chunk.range_len;

            let first = file_start_offset + chunk.range_start;
            let last = first + chunk.range_len - 1;
            assert_eq!(first / capacity, last / capacity, "chunk crosses an MDU");
            assert_eq!(
                blob_index_for_raw_offset(first % capacity, blob_size),
                blob_index_for_raw_offset(last % capacity, blob_size),
                "chunk crosses a blob"
            );
        }
    }
}
