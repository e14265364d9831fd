pub mod daily;
pub mod series;
pub mod tariff;
pub mod window;
