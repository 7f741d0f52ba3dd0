use std::net::{Ipv4Addr, SocketAddr};
use std::sync::OnceLock;
use tracing::error;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

pub const TOKEN: &str = "test-token";

/// Start a mock gateway on a free port and return its base URL.
///
/// Every `#[tokio::test]` owns its runtime, so each test gets its own server.
#[allow(unused)]
pub async fn init() -> String {
    static ONCE_LOCK: OnceLock<()> = OnceLock::new();

    ONCE_LOCK.get_or_init(|| {
        let default_panic = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            error!("Panic occurred: {info:?}");
            default_panic(info);
        }));

        let _ = FmtSubscriber::builder()
            .with_env_filter(
                EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| EnvFilter::new("volley=debug,mock_service=info")),
            )
            .with_test_writer()
            .try_init();
    });

    let addr: SocketAddr = (Ipv4Addr::LOCALHOST, 0).into();
    let addr = mock_service::spawn(addr, TOKEN).await.unwrap();
    format!("http://{addr}")
}

/// Environment lookup for plan files: the mock's URL and token, nothing else.
#[allow(unused)]
pub fn env(base_url: &str) -> impl Fn(&str) -> Option<String> + '_ {
    move |name| match name {
        "BASE_URL" => Some(base_url.to_string()),
        "ACCESS_TOKEN" => Some(TOKEN.to_string()),
        _ => None,
    }
}
