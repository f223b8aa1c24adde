pub mod fastag_acq;
