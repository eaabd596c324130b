mod magpie;

pub use magpie::MagpieError;

pub trait IsRetryable {
    fn is_retryable(&self) -> bool;
}
