pub mod balance;
pub mod card;
pub mod router;
pub mod signature;
pub mod wallet;

pub use balance::BalanceChannel;
pub use card::CardChannel;
pub use router::ChannelRouter;
pub use wallet::WalletChannel;
