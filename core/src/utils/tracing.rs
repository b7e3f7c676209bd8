/// Install the fmt subscriber and a panic hook. Safe to call more than once:
/// a subscriber registered elsewhere wins and the second init is a no-op.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt::try_init();

    // Panics should land on stderr even before any subscriber is up.
    std::panic::set_hook(Box::new(|pi| {
        eprintln!("panic: {}", pi);
    }));
}
