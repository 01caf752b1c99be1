pub mod mobilitydata;
