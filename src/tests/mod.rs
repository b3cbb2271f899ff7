//! End-to-end tests of the load / create-VM / unload sequence against the
//! simulated processor.
