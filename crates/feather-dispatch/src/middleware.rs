use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlFlow {
    /// Proceed to the next layer (or the terminal, if this is the last one).
    Continue,
    /// Skip the remaining chain and the terminal entirely. The layer is
    /// expected to have already populated whatever the context's "response"
    /// slot is (spec §4.4/§4.5: the prompt cache sets `ctx.response` on hit).
    ShortCircuit,
}

/// One layer of the onion-model request pipeline (spec §4.4). A stack
/// `[A, B]` run against a terminal produces `A-pre, B-pre, terminal, B-post,
/// A-post` — `post` runs in LIFO order relative to `pre`.
#[async_trait]
pub trait Middleware<C: Send>: Send + Sync {
    async fn pre(&self, ctx: &mut C) -> anyhow::Result<ControlFlow>;

    /// Runs after the remaining chain/terminal returns successfully. Skipped
    /// entirely if this layer short-circuited, if `pre` failed, or if
    /// anything nested inside (another layer's `pre`/`post`, or the
    /// terminal) returned an error.
    async fn post(&self, _ctx: &mut C) -> anyhow::Result<()> {
        Ok(())
    }

    /// Runs once when this layer's own `pre` failed or short-circuited —
    /// i.e. exactly when this layer's `next` was never invoked. Never runs
    /// for a layer that successfully called through to the rest of the
    /// chain. Errors raised here are swallowed by [`run_chain`].
    async fn finally(&self, _ctx: &mut C, _err: Option<&anyhow::Error>) {}
}

/// Runs `stack` against `ctx`, invoking `terminal` once every layer has
/// continued past its `pre` phase.
pub async fn run_chain<C: Send>(
    stack: &[Arc<dyn Middleware<C>>],
    ctx: &mut C,
    terminal: impl FnOnce(&mut C) -> BoxFuture<'_, anyhow::Result<()>>,
) -> anyhow::Result<()> {
    let mut entered: Vec<Arc<dyn Middleware<C>>> = Vec::with_capacity(stack.len());

    for mw in stack {
        match run_pre(mw.as_ref(), ctx).await {
            Ok(ControlFlow::Continue) => entered.push(mw.clone()),
            Ok(ControlFlow::ShortCircuit) => {
                run_finally(mw.as_ref(), ctx, None).await;
                return run_posts(&entered, ctx).await;
            }
            Err(e) => {
                run_finally(mw.as_ref(), ctx, Some(&e)).await;
                return Err(e);
            }
        }
    }

    match terminal(ctx).await {
        Ok(()) => run_posts(&entered, ctx).await,
        Err(e) => Err(e),
    }
}

async fn run_pre<C: Send>(mw: &(dyn Middleware<C>), ctx: &mut C) -> anyhow::Result<ControlFlow> {
    mw.pre(ctx).await
}

async fn run_finally<C: Send>(mw: &(dyn Middleware<C>), ctx: &mut C, err: Option<&anyhow::Error>) {
    mw.finally(ctx, err).await;
}

async fn run_posts<C: Send>(entered: &[Arc<dyn Middleware<C>>], ctx: &mut C) -> anyhow::Result<()> {
    for mw in entered.iter().rev() {
        mw.post(ctx).await?;
    }
    Ok(())
}
