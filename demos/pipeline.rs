use async_trait::async_trait;
use pipewright::prelude::*;
use tokio::sync::oneshot;

/// Emits a range of numbers, then disconnects its output.
struct Numbers {
    range: std::ops::Range<i64>,
    output: Option<ChannelWriter<i64>>,
}

#[async_trait]
impl Process for Numbers {
    fn name(&self) -> &str {
        "numbers"
    }

    async fn run(&mut self) -> Result<()> {
        let Some(output) = self.output.take() else {
            return Ok(());
        };
        for n in self.range.clone() {
            output.write(n).await?;
        }
        Ok(())
    }
}

/// Prints every value it reads with a prefix, reporting the count when its
/// input closes.
struct Printer {
    prefix: &'static str,
    input: ChannelReader<i64>,
    done: Option<oneshot::Sender<usize>>,
}

#[async_trait]
impl Process for Printer {
    fn name(&self) -> &str {
        self.prefix
    }

    async fn run(&mut self) -> Result<()> {
        let mut count = 0;
        loop {
            match self.input.read().await {
                Ok(value) => {
                    println!("{}: {}", self.prefix, value);
                    count += 1;
                }
                Err(e) => {
                    if let Some(done) = self.done.take() {
                        let _ = done.send(count);
                    }
                    return Err(e).closed_ok();
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    println!("Pipewright Fan-out Pipeline\n");

    let numbers = Channel::rendezvous();
    let (delta, left, right) = Delta::with_outputs(&numbers);

    let (left_done, left_count) = oneshot::channel();
    let (right_done, right_count) = oneshot::channel();

    let queue = ProcessQueue::new(QueueConfig::default().max_workers(4));
    queue
        .enqueue(Printer {
            prefix: "left",
            input: left.reader(),
            done: Some(left_done),
        })
        .await?;
    queue
        .enqueue(Printer {
            prefix: "right",
            input: right.reader(),
            done: Some(right_done),
        })
        .await?;
    queue.enqueue(delta.named("splitter")).await?;
    queue
        .enqueue(Numbers {
            range: 1..6,
            output: Some(numbers.writer()),
        })
        .await?;

    // Both printers finish once the numbers run out and closure reaches them.
    let left = left_count.await.map_err(|_| Error::custom("left printer dropped"))?;
    let right = right_count.await.map_err(|_| Error::custom("right printer dropped"))?;
    queue.shutdown();

    println!("\nPipeline completed! left={} right={}", left, right);
    Ok(())
}
