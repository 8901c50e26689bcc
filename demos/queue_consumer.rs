use async_trait::async_trait;
use pipewright::prelude::*;
use std::time::Duration;

/// Polls a job channel; pauses itself after every third job so the demo can
/// show resume and soft reset.
struct JobConsumer {
    jobs: ChannelReader<String>,
    handled: usize,
}

#[async_trait]
impl Execute for JobConsumer {
    async fn execute(&mut self, handle: &ResetHandle) -> Result<bool> {
        let job = match self.jobs.try_read() {
            Ok(Some(job)) => job,
            Ok(None) => return Ok(false),
            Err(_) => {
                println!("  job channel closed, stopping");
                handle.stop();
                return Ok(false);
            }
        };

        let id = handle.start_execution();
        let worker = handle.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            println!("  finished {} ({})", job, id);
            worker.finish_execution(id);
        });

        self.handled += 1;
        Ok(true)
    }

    async fn reset(&mut self, handle: &ResetHandle) -> Result<()> {
        println!(
            "  reset after {} jobs, {} still in flight",
            self.handled,
            handle.execution_count()
        );
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    println!("Pipewright Resetable Consumer\n");

    let jobs = Channel::bounded(8);
    let consumer = ResetableProcess::new(
        "job-consumer",
        JobConsumer {
            jobs: jobs.reader(),
            handled: 0,
        },
    )
    .wait_time(Duration::from_millis(10));
    let handle = consumer.handle();

    let queue = ProcessQueue::new(QueueConfig::default().max_workers(2));
    queue.enqueue(consumer).await?;

    let writer = jobs.writer();
    for i in 0..4 {
        writer.write(format!("job-{i}")).await?;
    }

    tokio::time::sleep(Duration::from_millis(50)).await;
    println!("status: {}", handle.status());

    handle.pause();
    tokio::time::sleep(Duration::from_millis(30)).await;
    println!("status: {}", handle.status());
    handle.resume();

    for i in 4..8 {
        writer.write(format!("job-{i}")).await?;
    }
    println!("soft reset requested");
    handle.soft_reset();
    tokio::time::sleep(Duration::from_millis(60)).await;

    drop(writer);
    let mut statuses = handle.subscribe_status();
    statuses
        .wait_for(|status| *status == Status::Terminated)
        .await
        .map_err(|_| Error::custom("scheduler dropped"))?;

    let snapshot = handle.snapshot();
    println!(
        "\n{} finished: status={} in_flight={}",
        snapshot.name, snapshot.status, snapshot.execution_count
    );
    queue.shutdown();
    Ok(())
}
