//! # Load Queue Demo Entry Point
//!
//! Runs load queues against the built-in `simulated` component so the
//! scheduling engine can be watched end to end without a real system under
//! test.
//!
//! ## Modes
//! - **File:** `load_queue queue.yaml` loads a `QueueDefinition` and runs it.
//! - **Ramp up:** 10 threads, 3 every 500 ms, varying interval, with a
//!   per-iteration timeout.
//! - **Synchronized:** 4 threads held in lock-step rounds, resumed from the
//!   menu thread after every PAUSED.
//!
//! ## Outputs
//! - Checkpoints go to the debug log (`RUST_LOG=debug`), or to the CSV file
//!   named by `engine.checkpoint_csv` in the queue definition.
//! - Per-action statistics are printed when the queue finishes.

use std::{
    env,
    io::{Write, stdin, stdout},
    process::ExitCode,
    sync::Arc,
    thread,
    time::Duration,
};

use load_queue::{
    QueueHandler, QueueLoader, RampUpQueueLoader, ThreadingPattern,
    action::{
        ActionRequest,
        data::{ListDataProvider, RangeDataProvider},
        simulated::{COMPONENT, SimulatedConfig, simulated_factory},
    },
    config::QueueDefinition,
    loader::LoggingListener,
    telemetry::{CsvCheckpointSink, LogSink, TelemetrySink},
};
use log::{error, info};

const RAMP_UP_QUEUE: &str = "ramp-up demo";
const SYNC_QUEUE: &str = "synchronized demo";

fn main() -> ExitCode {
    env_logger::init();
    info!("=== LOAD QUEUE DEMO START ===");

    if let Some(path) = env::args().nth(1) {
        return match run_definition(&path) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                error!("{e}");
                ExitCode::FAILURE
            }
        };
    }

    let handler = QueueHandler::new();
    loop {
        let choice = prompt_menu();
        match choice.as_str() {
            "1" | "" => {
                if let Err(e) = run_ramp_up_demo(&handler) {
                    error!("Ramp up demo failed: {e}");
                }
                println!("\n Demo completed. Returning to menu...\n");
                thread::sleep(Duration::from_secs(1));
            }
            "2" => {
                if let Err(e) = run_synchronized_demo(&handler) {
                    error!("Synchronized demo failed: {e}");
                }
                println!("\n Demo completed. Returning to menu...\n");
                thread::sleep(Duration::from_secs(1));
            }
            "3" => {
                handler.cancel_all_queues();
                println!("Exiting. Goodbye!");
                info!("=== LOAD QUEUE DEMO FINISHED ===");
                return ExitCode::SUCCESS;
            }
            other => {
                println!("Unrecognized option '{}', please try again.", other);
            }
        }
    }
}

fn prompt_menu() -> String {
    println!("\n┌─────────────────────────────────────────────┐");
    println!("│     SELECT DEMO QUEUE                       │");
    println!("├─────────────────────────────────────────────┤");
    println!("│  1) RAMP UP (10 threads, 3 every 500 ms)    │");
    println!("│  2) SYNCHRONIZED ITERATIONS (4 threads)     │");
    println!("│  3) Exit                                    │");
    println!("└─────────────────────────────────────────────┘");
    print!("Select [1/2/3] (default: 1): ");
    let _ = stdout().flush();

    let mut input = String::new();
    let _ = stdin().read_line(&mut input);
    input.trim().to_string()
}

fn run_definition(path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let definition = QueueDefinition::load(path)?;
    let sink: Arc<dyn TelemetrySink> = match &definition.engine.checkpoint_csv {
        Some(csv) => CsvCheckpointSink::start(csv, definition.engine.checkpoint_batch_mode)?,
        None => Arc::new(LogSink),
    };

    let queue = RampUpQueueLoader::from_definition(&definition, sink)
        .listener(Arc::new(LoggingListener))
        .build();
    queue.schedule(definition.synchronized_iterations)?;
    queue.start()?;

    // a synchronized queue is resumed until it finishes
    while queue.wait_until_paused() {
        queue.resume()?;
    }
    queue.wait_until_finished();
    queue.join_workers();

    print_summary(&queue);
    Ok(())
}

fn run_ramp_up_demo(handler: &QueueHandler) -> Result<(), Box<dyn std::error::Error>> {
    let pattern = ThreadingPattern::ramp_up(10, false, 5, 0, 500, 3)
        .with_interval_range(100, 300)
        .with_iteration_timeout(5)
        .with_pass_rate(90.0)?;

    let queue = RampUpQueueLoader::builder(
        RAMP_UP_QUEUE,
        pattern,
        Arc::new(simulated_factory(SimulatedConfig {
            failure_percent: 5,
            ..SimulatedConfig::default()
        })),
    )
    .request(
        ActionRequest::new(COMPONENT, "transfer")
            .with_argument("user", "nobody")
            .with_transfer_unit("KB"),
    )
    .data_provider(Box::new(RangeDataProvider::new(
        "user",
        1,
        100,
        Some("user{}".into()),
    )))
    .listener(Arc::new(LoggingListener))
    .build();
    let statistics = queue.statistics();
    let passed = pattern.pass_rate_percent;

    handler.execute_queue(queue)?;
    handler.wait_until_queue_finish(RAMP_UP_QUEUE);

    println!("\n{statistics}");
    println!(
        "Queue {} (required pass rate {passed}%)",
        if statistics.is_passed(passed) { "PASSED" } else { "FAILED" }
    );
    Ok(())
}

fn run_synchronized_demo(handler: &QueueHandler) -> Result<(), Box<dyn std::error::Error>> {
    let pattern = ThreadingPattern::all_at_once(4, false, 3, 0);
    let queue = RampUpQueueLoader::builder(
        SYNC_QUEUE,
        pattern,
        Arc::new(simulated_factory(SimulatedConfig::default())),
    )
    .request(ActionRequest::new(COMPONENT, "transfer").with_argument("region", "none"))
    .data_provider(Box::new(ListDataProvider::new(
        "region",
        vec!["eu".into(), "us".into(), "apac".into()],
    )))
    .listener(Arc::new(LoggingListener))
    .build();
    let statistics = queue.statistics();

    handler.schedule_queue(queue, true)?;
    handler.start_queue(SYNC_QUEUE)?;

    let mut round = 1;
    while handler.wait_until_queue_paused(SYNC_QUEUE)? {
        println!("Round {round} done, every worker is parked. Resuming...");
        round += 1;
        handler.resume_queue(SYNC_QUEUE)?;
    }
    handler.wait_until_queue_finish(SYNC_QUEUE);

    println!("\n{statistics}");
    Ok(())
}

fn print_summary(queue: &RampUpQueueLoader) {
    println!("\n{}", queue.statistics());
    println!(
        "Queue '{}' {}",
        queue.name(),
        if queue.is_passed() { "PASSED" } else { "FAILED" }
    );
}
