pub mod chatmodel;
pub mod matchmodel;
pub mod usermodel;
