
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::provider::{
    FunctionCall, Generation, GenerationRequest, GenerativeModel, ProviderError, Usage,
};

type ErrorFactory = Box<dyn Fn() -> ProviderError + Send + Sync>;

enum Behavior {
    Reply(Generation),
    Fail(ErrorFactory),
    Stall,
    Panic,
}

/// In-process stand-in for the provider. Counts calls and keeps the last
/// request it was given.
pub(crate) struct MockModel {
    calls: AtomicUsize,
    last: Mutex<Option<GenerationRequest>>,
    behavior: Behavior,
}

impl MockModel {
    fn with_behavior(behavior: Behavior) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            last: Mutex::new(None),
            behavior,
        }
    }

    pub(crate) fn replying(text: &str) -> Self {
        Self::with_behavior(Behavior::Reply(Generation {
            text: text.to_string(),
            ..Generation::default()
        }))
    }

    pub(crate) fn failing(factory: impl Fn() -> ProviderError + Send + Sync + 'static) -> Self {
        Self::with_behavior(Behavior::Fail(Box::new(factory)))
    }

    /// Never answers.
    pub(crate) fn stalled() -> Self {
        Self::with_behavior(Behavior::Stall)
    }

    pub(crate) fn panicking() -> Self {
        Self::with_behavior(Behavior::Panic)
    }

    pub(crate) fn with_usage(mut self, total_tokens: u64) -> Self {
        if let Behavior::Reply(generation) = &mut self.behavior {
            generation.usage = Some(Usage {
                prompt_tokens: 0,
                candidates_tokens: total_tokens,
                total_tokens,
            });
        }
        self
    }

    pub(crate) fn with_function_calls(mut self, calls: Vec<FunctionCall>) -> Self {
        if let Behavior::Reply(generation) = &mut self.behavior {
            generation.function_calls = calls;
        }
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn last_request(&self) -> Option<GenerationRequest> {
        self.last.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerativeModel for MockModel {
    async fn generate(&self, request: GenerationRequest) -> Result<Generation, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last.lock().unwrap() = Some(request);

        match &self.behavior {
            Behavior::Reply(generation) => Ok(generation.clone()),
            Behavior::Fail(factory) => Err(factory()),
            Behavior::Stall => std::future::pending().await,
            Behavior::Panic => panic!("mock provider exploded"),
        }
    }
}

#[tokio::test]
async fn test_mock_model_counts_calls() {
    let mock = MockModel::replying("hi");
    let request = GenerationRequest {
        model: "m".into(),
        contents: vec![crate::provider::ChatTurn::user("hello")],
        function_calling: None,
    };

    let generation = mock.generate(request.clone()).await.unwrap();
    assert_eq!(generation.text, "hi");
    assert_eq!(mock.calls(), 1);
    assert_eq!(mock.last_request(), Some(request));
}
