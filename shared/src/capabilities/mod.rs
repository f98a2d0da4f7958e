pub mod cache_store;
pub mod clients;
pub mod gateway;
pub mod http;
pub mod remote;

pub use self::cache_store::{CacheError, CacheName, CacheStorage, MemoryCacheStorage};
pub use self::clients::{ClientRegistry, StaticClients};
pub use self::gateway::{AutoConfirm, ConfirmationGateway, NotificationKind};
pub use self::http::{
    HttpError, Method, Network, Request, RequestKey, RequestMode, Response, ResponseType,
};
pub use self::remote::{LocalRemote, RemoteCollection, RemoteError};

