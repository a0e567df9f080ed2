pub mod tastyworks;
