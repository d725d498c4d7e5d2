pub mod dummy_board;
