// Route modules for the hub
pub mod subscription; // Subscription/unsubscription requests
