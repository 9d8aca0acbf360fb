mod common;

use reactor_promise::{
    BoxError, CancelCode, CancelTokenSource, EventLoopBuilder, FutureError, Promise,
    TaskBuilder, TaskOptions, TaskTimeout, Work,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

fn recorder() -> Arc<Mutex<Vec<Duration>>> {
    Arc::new(Mutex::new(Vec::new()))
}

#[test]
fn test_due_tasks_fire_by_time_then_submission_order() {
    let (event_loop, clock) = common::manual_loop();
    let handle = event_loop.handle();
    let order = Arc::new(Mutex::new(Vec::new()));

    for (name, delay) in [("a", 10), ("b", 5), ("c", 10)] {
        let order = order.clone();
        let _ = handle.schedule(Work::action(move || order.lock().unwrap().push(name)), ms(delay));
    }

    event_loop.run_once();
    assert!(order.lock().unwrap().is_empty(), "nothing is due at time zero");
    assert_eq!(event_loop.pending_tasks(), 3);

    clock.advance(ms(10));
    event_loop.run_once();
    assert_eq!(*order.lock().unwrap(), vec!["b", "a", "c"]);
}

#[test]
fn test_zero_delay_task_from_a_job_fires_in_the_same_tick() {
    let (event_loop, _clock) = common::manual_loop();
    let handle = event_loop.handle();
    let scheduled = Arc::new(Mutex::new(None));

    let inner = handle.clone();
    let slot = scheduled.clone();
    handle.spawn(move || {
        let deferred = inner.schedule(Work::action(|| "same tick"), Duration::ZERO);
        *slot.lock().unwrap() = Some(deferred);
    });

    event_loop.run_once();
    let deferred = scheduled.lock().unwrap().take().expect("job ran");
    assert_eq!(deferred.result_now().unwrap(), "same tick");
}

#[test]
fn test_fixed_rate_catches_up_one_run_per_pass() {
    let (event_loop, clock) = common::manual_loop();
    let handle = event_loop.handle();
    let triggers = recorder();

    let sink = triggers.clone();
    let task = handle
        .schedule_fixed_rate(
            Work::action_with_context(move |context| sink.lock().unwrap().push(context.trigger_time())),
            Duration::ZERO,
            ms(10),
        )
        .unwrap();

    event_loop.run_once();
    assert_eq!(*triggers.lock().unwrap(), vec![ms(0)]);

    clock.advance(ms(35));
    event_loop.run_once();
    assert_eq!(
        *triggers.lock().unwrap(),
        vec![ms(0), ms(10), ms(20)],
        "a late task runs once in each pass of the tick"
    );

    event_loop.run_once();
    assert_eq!(*triggers.lock().unwrap(), vec![ms(0), ms(10), ms(20), ms(30)]);
    assert!(task.is_computing(), "periodic task stays computing while it runs");
}

#[test]
fn test_fixed_delay_measures_from_completion() {
    let (event_loop, clock) = common::manual_loop();
    let handle = event_loop.handle();
    let triggers = recorder();

    let sink = triggers.clone();
    let _task = handle
        .schedule_fixed_delay(
            Work::action_with_context(move |context| sink.lock().unwrap().push(context.trigger_time())),
            Duration::ZERO,
            ms(10),
        )
        .unwrap();

    event_loop.run_once();
    clock.advance(ms(35));
    event_loop.run_once();
    event_loop.run_once();
    assert_eq!(
        *triggers.lock().unwrap(),
        vec![ms(0), ms(10)],
        "the late run pushes the next one out instead of catching up"
    );

    clock.advance(ms(10));
    event_loop.run_once();
    assert_eq!(*triggers.lock().unwrap(), vec![ms(0), ms(10), ms(45)]);
}

#[test]
fn test_fixed_delay_includes_run_time() {
    let (event_loop, clock) = common::manual_loop();
    let handle = event_loop.handle();
    let triggers = recorder();

    let sink = triggers.clone();
    let work_clock = clock.clone();
    let _task = handle
        .schedule_fixed_delay(
            Work::action_with_context(move |context| {
                sink.lock().unwrap().push(context.trigger_time());
                work_clock.advance(ms(15));
            }),
            Duration::ZERO,
            ms(10),
        )
        .unwrap();

    for _ in 0..3 {
        event_loop.run_once();
        clock.advance(ms(10));
    }

    assert_eq!(*triggers.lock().unwrap(), vec![ms(0), ms(25), ms(50)]);
}

#[test]
fn test_count_budget_times_out_after_last_run() {
    let (event_loop, clock) = common::manual_loop();
    let handle = event_loop.handle();
    let runs = Arc::new(AtomicU32::new(0));

    let counter = runs.clone();
    let task = handle
        .submit_task(
            TaskBuilder::fixed_rate(
                Work::action(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
                ms(10),
            )
            .timeout(TaskTimeout::Count(3)),
        )
        .unwrap();

    for _ in 0..3 {
        event_loop.run_once();
        clock.advance(ms(10));
    }

    assert_eq!(runs.load(Ordering::SeqCst), 3);
    assert!(task.exception_now(false).unwrap().is_timeout());
    assert_eq!(event_loop.pending_tasks(), 0);
}

#[test]
fn test_count_budget_checked_before_run() {
    let (event_loop, clock) = common::manual_loop();
    let handle = event_loop.handle();
    let runs = Arc::new(AtomicU32::new(0));

    let counter = runs.clone();
    let task = handle
        .submit_task(
            TaskBuilder::fixed_rate(
                Work::action(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
                ms(10),
            )
            .timeout(TaskTimeout::Count(3))
            .options(TaskOptions::TIMEOUT_BEFORE_RUN),
        )
        .unwrap();

    for _ in 0..3 {
        event_loop.run_once();
        clock.advance(ms(10));
    }
    assert_eq!(runs.load(Ordering::SeqCst), 3);
    assert!(task.is_computing(), "exhaustion is noticed at the next trigger");

    event_loop.run_once();
    assert_eq!(runs.load(Ordering::SeqCst), 3, "no fourth run");
    assert!(task.exception_now(false).unwrap().is_timeout());
}

#[test]
fn test_duration_budget_counts_from_first_trigger() {
    let (event_loop, clock) = common::manual_loop();
    let handle = event_loop.handle();
    let runs = Arc::new(AtomicU32::new(0));

    let counter = runs.clone();
    let task = handle
        .submit_task(
            TaskBuilder::fixed_rate(
                Work::action(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
                ms(10),
            )
            .timeout(TaskTimeout::Duration(ms(25))),
        )
        .unwrap();

    for _ in 0..5 {
        event_loop.run_once();
        clock.advance(ms(10));
    }

    assert_eq!(runs.load(Ordering::SeqCst), 4, "runs at 0, 10, 20 and 30");
    assert!(task.exception_now(false).unwrap().is_timeout());
}

#[test]
fn test_invalid_periodic_arguments() {
    let (event_loop, _clock) = common::manual_loop();
    let handle = event_loop.handle();

    let zero_period = handle.schedule_fixed_rate(Work::action(|| {}), Duration::ZERO, Duration::ZERO);
    assert!(matches!(zero_period, Err(FutureError::InvalidArgument(_))));

    let zero_count = handle.submit_task(
        TaskBuilder::fixed_delay(Work::action(|| {}), ms(1)).timeout(TaskTimeout::Count(0)),
    );
    assert!(matches!(zero_count, Err(FutureError::InvalidArgument(_))));
    assert_eq!(event_loop.queued_jobs(), 0, "nothing was queued");
}

#[test]
fn test_periodic_failure_stops_the_task() {
    let (event_loop, clock) = common::manual_loop();
    let handle = event_loop.handle();
    let runs = Arc::new(AtomicU32::new(0));

    let counter = runs.clone();
    let task = handle
        .schedule_fixed_rate(
            Work::function(move || -> Result<(), BoxError> {
                if counter.fetch_add(1, Ordering::SeqCst) == 1 {
                    return Err("boom".into());
                }
                Ok(())
            }),
            Duration::ZERO,
            ms(10),
        )
        .unwrap();

    for _ in 0..4 {
        event_loop.run_once();
        clock.advance(ms(10));
    }

    assert_eq!(runs.load(Ordering::SeqCst), 2, "stopped after the failing run");
    assert_eq!(task.exception_now(false).unwrap().to_string(), "boom");
}

#[test]
fn test_tolerated_failure_keeps_rescheduling() {
    common::init_logging();
    let (event_loop, clock) = common::manual_loop();
    let handle = event_loop.handle();
    let runs = Arc::new(AtomicU32::new(0));

    let counter = runs.clone();
    let task = handle
        .submit_task(
            TaskBuilder::fixed_rate(
                Work::function(move || -> Result<(), BoxError> {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err("flaky".into())
                }),
                ms(10),
            )
            .options(TaskOptions::TOLERATE_FAILURE),
        )
        .unwrap();

    for _ in 0..4 {
        event_loop.run_once();
        clock.advance(ms(10));
    }

    assert_eq!(runs.load(Ordering::SeqCst), 4);
    assert!(task.is_computing());
}

#[test]
fn test_one_shot_failure_and_panic() {
    let (event_loop, _clock) = common::manual_loop();
    let handle = event_loop.handle();

    let failed = handle.schedule(
        Work::function(|| -> Result<u8, BoxError> { Err("boom".into()) }),
        Duration::ZERO,
    );
    let panicked = handle.schedule(Work::action(|| -> u8 { panic!("task panic") }), Duration::ZERO);

    event_loop.run_once();

    assert_eq!(failed.exception_now(false).unwrap().to_string(), "boom");
    assert!(matches!(
        panicked.exception_now(false).unwrap(),
        FutureError::Panicked(message) if message == "task panic"
    ));
}

#[test]
fn test_token_cancel_unschedules_the_task() {
    let (event_loop, clock) = common::manual_loop();
    let handle = event_loop.handle();
    let source = CancelTokenSource::new();
    let runs = Arc::new(AtomicU32::new(0));

    let counter = runs.clone();
    let task = handle
        .submit_task(
            TaskBuilder::once(Work::action(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .delay(ms(50))
            .token(source.token()),
        )
        .unwrap();

    event_loop.run_once();
    assert_eq!(event_loop.pending_tasks(), 1);

    let code = CancelCode::new(21).unwrap();
    source.cancel(code).unwrap();
    assert_eq!(task.exception_now(false).unwrap().cancel_code(), Some(code));

    event_loop.run_once();
    assert_eq!(event_loop.pending_tasks(), 0, "removed on the next tick");

    clock.advance(ms(100));
    event_loop.run_once();
    assert_eq!(runs.load(Ordering::SeqCst), 0);
}

#[test]
fn test_without_remove_token_is_found_when_due() {
    let (event_loop, clock) = common::manual_loop();
    let handle = event_loop.handle();
    let source = CancelTokenSource::new();
    let runs = Arc::new(AtomicU32::new(0));

    let counter = runs.clone();
    let task = handle
        .submit_task(
            TaskBuilder::once(Work::action(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .delay(ms(50))
            .token(source.token()),
        )
        .unwrap();
    event_loop.run_once();

    let code = CancelCode::DEFAULT.without_remove();
    source.cancel(code).unwrap();
    event_loop.run_once();
    assert!(task.is_pending(), "left in place until it is due");
    assert_eq!(event_loop.pending_tasks(), 1);

    clock.advance(ms(50));
    event_loop.run_once();
    assert_eq!(task.exception_now(false).unwrap().cancel_code(), Some(code));
    assert_eq!(runs.load(Ordering::SeqCst), 0, "cancelled tasks never run");
    assert_eq!(event_loop.pending_tasks(), 0);
}

#[test]
fn test_consumer_cancel_unschedules_periodic_task() {
    let (event_loop, clock) = common::manual_loop();
    let handle = event_loop.handle();
    let runs = Arc::new(AtomicU32::new(0));

    let counter = runs.clone();
    let task = handle
        .schedule_fixed_rate(
            Work::action(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
            Duration::ZERO,
            ms(10),
        )
        .unwrap();

    event_loop.run_once();
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    assert!(task.cancel(CancelCode::DEFAULT));
    event_loop.run_once();
    assert_eq!(event_loop.pending_tasks(), 0);

    clock.advance(ms(30));
    event_loop.run_once();
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[test]
fn test_work_cancelling_its_own_token() {
    let (event_loop, clock) = common::manual_loop();
    let handle = event_loop.handle();
    let source = CancelTokenSource::new();
    let runs = Arc::new(AtomicU32::new(0));

    let counter = runs.clone();
    let canceller = source.clone();
    let task = handle
        .submit_task(
            TaskBuilder::fixed_rate(
                Work::function_with_context(move |context| -> Result<(), BoxError> {
                    if counter.fetch_add(1, Ordering::SeqCst) == 1 {
                        canceller.cancel(CancelCode::TIMEOUT)?;
                    }
                    context.token().check_cancel()?;
                    Ok(())
                }),
                ms(10),
            )
            .token(source.token()),
        )
        .unwrap();

    for _ in 0..4 {
        event_loop.run_once();
        clock.advance(ms(10));
    }

    assert_eq!(runs.load(Ordering::SeqCst), 2);
    assert!(task.is_cancelled(), "cancellation from inside the work is not a failure");
    assert_eq!(
        task.exception_now(false).unwrap().cancel_code(),
        Some(CancelCode::TIMEOUT)
    );
    assert_eq!(event_loop.pending_tasks(), 0);
}

#[test]
fn test_task_context_reports_runs() {
    let (event_loop, clock) = common::manual_loop();
    let handle = event_loop.handle();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let sink = seen.clone();
    let _task = handle
        .schedule_fixed_rate(
            Work::action_with_context(move |context| {
                sink.lock()
                    .unwrap()
                    .push((context.run_count(), context.tick_time()));
            }),
            ms(5),
            ms(10),
        )
        .unwrap();

    clock.advance(ms(5));
    event_loop.run_once();
    clock.advance(ms(12));
    event_loop.run_once();

    assert_eq!(*seen.lock().unwrap(), vec![(0, ms(5)), (1, ms(17))]);
}

#[test]
fn test_submit_runs_in_fifo_order() {
    let (event_loop, _clock) = common::manual_loop();
    let handle = event_loop.handle();
    let order = Arc::new(Mutex::new(Vec::new()));

    let results: Vec<_> = (0..5)
        .map(|i| {
            let order = order.clone();
            handle.submit(move || {
                order.lock().unwrap().push(i);
                i * i
            })
        })
        .collect();
    let panicked = handle.submit(|| -> u8 { panic!("job panic") });

    assert_eq!(event_loop.queued_jobs(), 6);
    event_loop.run_once();

    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    for (i, result) in results.iter().enumerate() {
        assert_eq!(result.result_now().unwrap(), i * i);
    }
    assert!(matches!(
        panicked.exception_now(false).unwrap(),
        FutureError::Panicked(_)
    ));
}

#[test]
fn test_jobs_queued_during_drain_wait_for_next_tick() {
    let (event_loop, _clock) = common::manual_loop();
    let handle = event_loop.handle();
    let ran = Arc::new(AtomicU32::new(0));

    let inner = handle.clone();
    let counter = ran.clone();
    handle.spawn(move || {
        inner.spawn(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
    });

    event_loop.run_once();
    assert_eq!(ran.load(Ordering::SeqCst), 0, "drain only takes what was queued");
    assert_eq!(event_loop.queued_jobs(), 1);

    event_loop.run_once();
    assert_eq!(ran.load(Ordering::SeqCst), 1);
}

#[test]
fn test_shutdown_rejects_jobs_and_cancels_tasks() {
    common::init_logging();
    let (event_loop, _clock) = common::manual_loop();
    let handle = event_loop.handle();

    let delayed = handle.schedule(Work::action(|| 1), ms(100));
    event_loop.run_once();
    let queued_task = handle.schedule(Work::action(|| 2), ms(100));
    let queued_job = handle.submit(|| 3);

    event_loop.shutdown();

    assert!(handle.is_shutdown());
    assert!(handle.is_terminated());
    assert_eq!(delayed.exception_now(false).unwrap().cancel_code(), Some(CancelCode::SHUTDOWN));
    assert_eq!(
        queued_task.exception_now(false).unwrap().cancel_code(),
        Some(CancelCode::SHUTDOWN)
    );
    assert!(matches!(
        queued_job.exception_now(false).unwrap(),
        FutureError::Rejected
    ));

    let late_job = handle.submit(|| 4);
    assert!(matches!(late_job.exception_now(false).unwrap(), FutureError::Rejected));
    let late_task = handle.schedule(Work::action(|| 5), Duration::ZERO);
    assert_eq!(
        late_task.exception_now(false).unwrap().cancel_code(),
        Some(CancelCode::SHUTDOWN)
    );

    assert_eq!(event_loop.run_once(), 0);
    assert!(handle.await_termination(Duration::ZERO));
}

#[test]
fn test_run_until_idle_and_block_on() {
    common::init_logging();
    let event_loop = EventLoopBuilder::new().name("blocking").build();
    let handle = event_loop.handle();

    let first = handle.submit(|| 1);
    let second = handle.submit(|| 2);
    assert!(event_loop.run_until_idle() >= 2);
    assert!(first.is_done() && second.is_done());

    let delayed = handle.schedule(Work::action(|| "late"), ms(20));
    assert_eq!(event_loop.block_on(&delayed).unwrap(), "late");
}

#[test]
fn test_block_on_wakes_when_completed_elsewhere() {
    common::init_logging();
    let event_loop = EventLoopBuilder::new()
        .name("woken")
        .idle_park(Duration::from_secs(30))
        .build();
    let promise = Promise::<u32>::new();

    let remote = promise.clone();
    let completer = thread::spawn(move || {
        thread::sleep(ms(20));
        remote.try_set_result(9);
    });

    let started = Instant::now();
    assert_eq!(event_loop.block_on(&promise.deferred()).unwrap(), 9);
    assert!(
        started.elapsed() < Duration::from_secs(10),
        "the loop is woken instead of sleeping out its idle park"
    );
    completer.join().unwrap();
}

#[test]
fn test_spawned_loop_runs_periodic_task_to_its_budget() {
    common::init_logging();
    let handle = EventLoopBuilder::new().name("periodic").spawn().unwrap();
    let runs = Arc::new(AtomicU32::new(0));

    let counter = runs.clone();
    let task = handle
        .submit_task(
            TaskBuilder::fixed_rate(
                Work::action(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
                ms(100),
            )
            .delay(ms(100))
            .timeout(TaskTimeout::Count(3)),
        )
        .unwrap();

    let result = task.join();
    assert!(
        matches!(result, Err(FutureError::Timeout)),
        "budget exhaustion is reported as a timeout"
    );
    assert_eq!(runs.load(Ordering::SeqCst), 3);

    handle.shutdown();
    assert!(handle.await_termination(Duration::from_secs(5)));
    assert!(handle.is_terminated());
}
