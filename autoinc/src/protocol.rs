use super::*;

use crate::error::is_retryable;

/// How an allocation reacts to losing a race.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub enum Mode {
    /// Read again and retry until the write succeeds.
    #[default]
    Guarded,
    /// Make a single attempt and return the conflict to the caller.
    /// This is only correct if there is one writer per sequence at a time.
    Unguarded,
}

/// `Sequence` is what an allocator plugs into the allocation loop:
/// how to read the current state, what precondition says "nothing has changed since the read",
/// and how to write the next value.
#[async_trait]
pub trait Sequence: Sync + Send {
    /// The state read at the beginning of an attempt.
    type State: Send;

    /// Used in logs.
    fn label(&self) -> &str;

    /// The first value of the sequence.
    fn initial_value(&self) -> i64;

    async fn read_state(&self) -> Result<Self::State>;

    /// The last allocated value in `state`. `None` if nothing has been allocated.
    fn current_value(&self, state: &Self::State) -> Result<Option<i64>>;

    /// Precondition which holds only while the stored state is still `state`.
    fn condition(&self, state: &Self::State) -> Condition;

    /// Write `next` under `condition`.
    /// A failed condition must surface as a retryable conflict.
    async fn write(&self, state: Self::State, next: i64, condition: Condition) -> Result<()>;
}

/// The value following `current`.
pub fn next_value(current: Option<i64>, initial: i64) -> Result<i64> {
    match current {
        None => Ok(initial),
        Some(x) => match x.checked_add(1) {
            Some(next) => Ok(next),
            None => bail!(Error::SequenceExhausted(x)),
        },
    }
}

/// Run the read-compute-write loop until a value is allocated.
///
/// In `Guarded` mode a conflict restarts the loop from the read.
/// If `max_attempts` is given, the loop gives up with `Error::RetriesExhausted`
/// after that many conflicting attempts.
/// In `Unguarded` mode the first conflict is returned as it is.
/// Any other error ends the loop immediately.
pub async fn allocate<S: Sequence + ?Sized>(
    seq: &S,
    mode: Mode,
    max_attempts: Option<u32>,
) -> Result<i64> {
    let mut attempt = 0u32;
    loop {
        attempt += 1;

        let state = seq.read_state().await?;
        let next = next_value(seq.current_value(&state)?, seq.initial_value())?;
        let condition = seq.condition(&state);

        let e = match seq.write(state, next, condition).await {
            Ok(()) => {
                debug!("allocated {next} for {} (attempt={attempt})", seq.label());
                return Ok(next);
            }
            Err(e) => e,
        };

        if !is_retryable(&e) {
            return Err(e);
        }
        match mode {
            Mode::Unguarded => {
                debug!("lost the race for {next} on {}", seq.label());
                return Err(e);
            }
            Mode::Guarded => {
                if let Some(max) = max_attempts {
                    if attempt >= max {
                        warn!("gave up allocating on {} (attempts={attempt})", seq.label());
                        bail!(Error::RetriesExhausted(attempt));
                    }
                }
                debug!(
                    "conflict on {} (candidate={next}, attempt={attempt}). retrying",
                    seq.label()
                );
                tokio::task::yield_now().await;
            }
        }
    }
}
