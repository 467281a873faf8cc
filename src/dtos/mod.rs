pub mod matchdtos;
